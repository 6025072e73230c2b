//! AES-XTS page cipher
//!
//! Container payload pages are encrypted with XTS-AES-128, one 4096-byte
//! page per XTS data unit. The 16-byte tweak is rebuilt for every page:
//!
//! ```text
//! bytes 0..4   data unit tag (LE u32, from the page's hash entry, else 0)
//! bytes 4..8   region/header id (LE u32)
//! bytes 8..16  first 8 bytes of the container VDUID
//! ```
//!
//! Only decryption is provided. Pages hold no state between each other, so
//! callers may transform them in any order or in parallel.

use aes::Aes128;
use cipher::KeyInit;
use cipher::generic_array::GenericArray;
use xts_mode::Xts128;

use crate::error::{CryptoError, Result};
use crate::keys::KeyEntry;

/// Size of one container page in bytes
pub const PAGE_SIZE: usize = 0x1000;

/// Reconstructible 16-byte XTS tweak for one page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PageTweak([u8; 16]);

impl PageTweak {
    /// Build a tweak from its three components
    pub fn new(data_unit: u32, header_id: u32, vduid: &[u8; 16]) -> Self {
        let mut tweak = Self::for_region(header_id, vduid);
        tweak.set_data_unit(data_unit);
        tweak
    }

    /// Tweak template for a region, with the data unit left at zero
    pub fn for_region(header_id: u32, vduid: &[u8; 16]) -> Self {
        let mut bytes = [0u8; 16];
        bytes[4..8].copy_from_slice(&header_id.to_le_bytes());
        bytes[8..16].copy_from_slice(&vduid[..8]);
        Self(bytes)
    }

    /// Replace the per-page data unit word
    pub fn set_data_unit(&mut self, data_unit: u32) {
        self.0[..4].copy_from_slice(&data_unit.to_le_bytes());
    }

    /// Current data unit word
    pub fn data_unit(&self) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Region/header id word
    pub fn header_id(&self) -> u32 {
        u32::from_le_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }

    /// Raw tweak bytes
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<[u8; 16]> for PageTweak {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

/// Whether the running CPU exposes AES instructions
pub fn hardware_aes_available() -> bool {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        std::arch::is_x86_feature_detected!("aes")
    }
    #[cfg(target_arch = "aarch64")]
    {
        std::arch::is_aarch64_feature_detected!("aes")
    }
    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
    {
        false
    }
}

/// XTS-AES-128 page decryptor built from a [`KeyEntry`]
pub struct PageCipher {
    xts: Xts128<Aes128>,
}

impl PageCipher {
    /// Create a page cipher from the data and tweak halves of a key entry
    ///
    /// Fails with [`CryptoError::HardwareAesUnavailable`] when the CPU has no
    /// AES instructions; there is no software fallback.
    pub fn new(key: &KeyEntry) -> Result<Self> {
        if !hardware_aes_available() {
            return Err(CryptoError::HardwareAesUnavailable);
        }
        Ok(Self::from_keys(&key.data_key, &key.tweak_key))
    }

    /// Create a page cipher from raw keys (data key encrypts, tweak key masks)
    pub fn from_keys(data_key: &[u8; 16], tweak_key: &[u8; 16]) -> Self {
        let data = Aes128::new(GenericArray::from_slice(data_key));
        let tweak = Aes128::new(GenericArray::from_slice(tweak_key));
        Self {
            xts: Xts128::new(data, tweak),
        }
    }

    /// Decrypt one page in place
    pub fn decrypt_page(&self, page: &mut [u8], tweak: &PageTweak) -> Result<()> {
        if page.len() != PAGE_SIZE {
            return Err(CryptoError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: page.len(),
            });
        }
        self.xts.decrypt_sector(page, tweak.0);
        Ok(())
    }

    /// Decrypt an arbitrary XTS data unit in place (at least one AES block)
    ///
    /// Used for known-answer checks against published vectors, which are
    /// shorter than a page.
    pub fn decrypt_unit(&self, unit: &mut [u8], tweak: &PageTweak) -> Result<()> {
        if unit.len() < 16 {
            return Err(CryptoError::InvalidPageSize {
                expected: 16,
                actual: unit.len(),
            });
        }
        self.xts.decrypt_sector(unit, tweak.0);
        Ok(())
    }
}
