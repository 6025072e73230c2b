//! User data region
//!
//! The region opens with a 16-byte header. For the "package files" type a
//! file table follows at `header.length`, and every entry's bytes live at
//! `header.length + entry.offset`.

use binrw::{BinRead, BinWrite};
use serde::Serialize;
use std::io::Cursor;

use crate::error::{FormatError, Result};
use crate::{XvdFormat, read_records, slice_at, utf16, write_records};

/// Serialized size of [`UserDataHeader`]
pub const USER_DATA_HEADER_SIZE: u32 = 0x10;
/// Serialized size of [`PackageFilesHeader`]
pub const PACKAGE_FILES_HEADER_SIZE: u64 = 0x08;
/// Serialized size of [`PackageFileEntry`]
pub const PACKAGE_FILE_ENTRY_SIZE: u64 = 0x210;

/// User data payload type
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[brw(little)]
pub struct UserDataType(pub u32);

impl UserDataType {
    /// Table of named files
    pub const PACKAGE_FILES: Self = Self(0);
}

/// User data header (16 bytes)
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[brw(little)]
pub struct UserDataHeader {
    /// Header length; the payload starts here
    pub length: u32,
    /// Version
    pub version: u32,
    /// Payload type
    pub data_type: UserDataType,
    /// Unknown
    pub unknown: u32,
}

impl Default for UserDataHeader {
    fn default() -> Self {
        Self {
            length: USER_DATA_HEADER_SIZE,
            version: 0,
            data_type: UserDataType::PACKAGE_FILES,
            unknown: 0,
        }
    }
}

/// Package files table header
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[brw(little)]
pub struct PackageFilesHeader {
    /// Version
    pub version: u32,
    /// Number of entries
    pub file_count: u32,
}

/// Package file entry (0x210 bytes)
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct PackageFileEntry {
    /// File path (UTF-16)
    pub file_path: [u8; 0x208],
    /// File size in bytes
    pub size: u32,
    /// Offset of the contents relative to the end of the user data header
    pub offset: u32,
}

impl PackageFileEntry {
    /// File path text
    pub fn path_str(&self) -> Result<String> {
        utf16::decode(&self.file_path)
    }
}

/// A package file with its contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    /// Decoded path
    pub name: String,
    /// Table entry
    pub entry: PackageFileEntry,
    /// File bytes
    pub contents: Vec<u8>,
}

/// Parsed user data region
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserData {
    /// Region header
    pub header: UserDataHeader,
    /// Table header, present for the package files type
    pub package_files_header: Option<PackageFilesHeader>,
    /// Package files in table order
    pub files: Vec<PackageFile>,
}

impl UserData {
    /// Lay out a package files region holding `files`
    pub fn with_package_files<I, S>(files: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<u8>)>,
        S: Into<String>,
    {
        let files: Vec<(String, Vec<u8>)> = files
            .into_iter()
            .map(|(name, contents)| (name.into(), contents))
            .collect();

        let file_count = u32::try_from(files.len())
            .map_err(|_| FormatError::Overflow("package file count"))?;
        let mut offset = PACKAGE_FILES_HEADER_SIZE + u64::from(file_count) * PACKAGE_FILE_ENTRY_SIZE;

        let mut packaged = Vec::with_capacity(files.len());
        for (name, contents) in files {
            let size = u32::try_from(contents.len())
                .map_err(|_| FormatError::Overflow("package file size"))?;
            let entry = PackageFileEntry {
                file_path: utf16::encode_array(&name)?,
                size,
                offset: u32::try_from(offset)
                    .map_err(|_| FormatError::Overflow("package file offset"))?,
            };
            offset += u64::from(size);
            packaged.push(PackageFile {
                name,
                entry,
                contents,
            });
        }

        Ok(Self {
            header: UserDataHeader::default(),
            package_files_header: Some(PackageFilesHeader {
                version: 0,
                file_count,
            }),
            files: packaged,
        })
    }

    /// Package file by name
    pub fn file(&self, name: &str) -> Option<&PackageFile> {
        self.files.iter().find(|file| file.name == name)
    }

    /// Whether the region carries a package files table
    pub fn has_package_files(&self) -> bool {
        self.package_files_header.is_some()
    }
}

impl XvdFormat for UserData {
    fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let header = UserDataHeader::read(&mut cursor)?;

        if header.data_type != UserDataType::PACKAGE_FILES {
            return Ok(Self {
                header,
                package_files_header: None,
                files: Vec::new(),
            });
        }

        let base = u64::from(header.length);
        cursor.set_position(base);
        if base > data.len() as u64 {
            return Err(FormatError::TruncatedData {
                expected: base,
                actual: data.len() as u64,
            });
        }

        let table = PackageFilesHeader::read(&mut cursor)?;
        let entries: Vec<PackageFileEntry> = read_records(
            &mut cursor,
            u64::from(table.file_count),
            PACKAGE_FILE_ENTRY_SIZE,
        )?;

        let mut files = Vec::with_capacity(entries.len());
        for entry in entries {
            let contents = slice_at(data, base + u64::from(entry.offset), u64::from(entry.size))?;
            files.push(PackageFile {
                name: entry.path_str()?,
                contents: contents.to_vec(),
                entry,
            });
        }

        Ok(Self {
            header,
            package_files_header: Some(table),
            files,
        })
    }

    fn build(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.header
            .write(&mut cursor)
            .map_err(|e| FormatError::BinWrite(e.to_string()))?;

        let Some(table) = self.package_files_header else {
            return Ok(cursor.into_inner());
        };

        let base = u64::from(self.header.length);
        cursor.set_position(base);
        table
            .write(&mut cursor)
            .map_err(|e| FormatError::BinWrite(e.to_string()))?;
        let entries: Vec<PackageFileEntry> = self.files.iter().map(|f| f.entry.clone()).collect();
        write_records(&mut cursor, &entries)?;

        let mut bytes = cursor.into_inner();
        for file in &self.files {
            let start = (base + u64::from(file.entry.offset)) as usize;
            let end = start + file.contents.len();
            if bytes.len() < end {
                bytes.resize(end, 0);
            }
            bytes[start..end].copy_from_slice(&file.contents);
        }
        Ok(bytes)
    }
}
