//! # File System Module
//!
//! Each supported disk BASIC / micro-OS file system lives in a sub-module
//! providing two things: an allocation strategy (how free space is
//! represented and groups are chained) and a directory entry codec (the
//! byte layout of one directory record).  The closed enums in `alloc` and
//! `entry` dispatch over the variants; `dir` builds the directory tree on
//! top of any pair; `detect` scores the pairs against raw sectors and
//! picks the best match.
//!
//! The shared data model is here: `GroupRef`/`GroupList` name the storage
//! occupied by a file, `FileAttr` is the format-independent attribute
//! projection (with native origin words kept for round trips), and
//! `DirItemAttr` is the staging struct a caller fills to create or rename
//! an entry.

pub mod templates;
pub mod alloc;
pub mod entry;
pub mod dir;
pub mod detect;
pub mod fat8;
pub mod fat12;
pub mod dos3x;
pub mod c1541;
pub mod flex;
pub mod trsdos;
pub mod amiga;
pub mod hfs;
pub mod cpm;
pub mod mz;

use std::fmt;
use num_derive::FromPrimitive;

/// Enumerates file system errors.  The `Display` trait will print the equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("on-disk structure inconsistent with format")]
    Structural,
    #[error("chain exceeded the group ceiling")]
    ChainLimit,
    #[error("no free group before the start group")]
    NoSpaceBeforeStart,
    #[error("no free group after the start group")]
    NoSpaceAfterStart,
    #[error("file not found")]
    FileNotFound,
    #[error("file already exists")]
    DuplicateFile,
    #[error("name violates format rules")]
    BadName,
    #[error("file is write protected")]
    WriteProtected,
    #[error("directory is not empty")]
    DeleteNotEmpty,
    #[error("entry is a volume label")]
    DeleteVolumeLabel,
    #[error("operation not meaningful for this format")]
    Unsupported,
    #[error("request out of range")]
    Range
}

/// Enumerates every supported file system variant.
#[derive(Clone,Copy,PartialEq,Eq,Debug,FromPrimitive)]
pub enum FormatKind {
    Fat8 = 0,
    Fat12,
    AppleDos,
    C1541,
    Flex,
    Trsdos13,
    Trsdos2x,
    AmigaOfs,
    AmigaFfs,
    Hfs,
    Cpm,
    MzBasic,
    Cdos
}

impl fmt::Display for FormatKind {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fat8 => write!(f,"N88 disk BASIC"),
            Self::Fat12 => write!(f,"FAT12"),
            Self::AppleDos => write!(f,"Apple DOS 3.x"),
            Self::C1541 => write!(f,"Commodore 1541"),
            Self::Flex => write!(f,"FLEX"),
            Self::Trsdos13 => write!(f,"TRSDOS 1.3"),
            Self::Trsdos2x => write!(f,"TRSDOS 2.x"),
            Self::AmigaOfs => write!(f,"Amiga OFS"),
            Self::AmigaFfs => write!(f,"Amiga FFS"),
            Self::Hfs => write!(f,"Macintosh HFS"),
            Self::Cpm => write!(f,"CP/M"),
            Self::MzBasic => write!(f,"MZ disk BASIC"),
            Self::Cdos => write!(f,"CDOS")
        }
    }
}

// Common attribute mask bits.  Every entry codec projects its native
// attribute bytes onto these, and reconstructs native bits from them.
pub const DIRECTORY: u16 = 0x0001;
pub const VOLUME: u16 = 0x0002;
pub const READ_ONLY: u16 = 0x0004;
pub const HIDDEN: u16 = 0x0008;
pub const SYSTEM: u16 = 0x0010;
pub const BINARY: u16 = 0x0020;
pub const ASCII: u16 = 0x0040;
pub const RANDOM: u16 = 0x0080;
pub const MACHINE: u16 = 0x0100;
pub const TOKENIZED: u16 = 0x0200;

/// Format-independent attribute bundle.  The `common` mask is a lossy
/// projection; `origin` keeps up to three native attribute words verbatim
/// so that re-encoding a decoded bundle reproduces the raw bytes.
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub struct FileAttr {
    pub format: FormatKind,
    pub common: u16,
    pub origin: [u32;3]
}

impl FileAttr {
    pub fn new(format: FormatKind) -> Self {
        Self {
            format,
            common: 0,
            origin: [0;3]
        }
    }
    pub fn with_common(format: FormatKind,common: u16) -> Self {
        Self {
            format,
            common,
            origin: [0;3]
        }
    }
    pub fn is_set(&self,mask: u16) -> bool {
        self.common & mask > 0
    }
}

/// One allocation unit occupied by a file or directory.  Created by the
/// allocation strategies; immutable once pushed onto a `GroupList`.
#[derive(Clone,Copy,Debug)]
pub struct GroupRef {
    /// group (cluster) number in the format's own numbering
    pub group: u32,
    pub track: usize,
    pub side: usize,
    /// first physical sector of the unit, 0-based store index
    pub sector_start: usize,
    /// last physical sector of the unit, inclusive
    pub sector_end: usize,
    /// sub-division (index, count) for formats packing several logical
    /// sectors into one physical sector
    pub div: Option<(u8,u8)>,
    /// opaque per-format word (e.g. Amiga chain pointers)
    pub tag: u32
}

impl GroupRef {
    pub fn simple(group: u32,track: usize,side: usize,sector: usize) -> Self {
        Self {
            group,
            track,
            side,
            sector_start: sector,
            sector_end: sector,
            div: None,
            tag: 0
        }
    }
}

/// Ordered sequence of groups plus aggregate sizes.  Owned by the item it
/// describes and rebuilt wholesale on every size change; the list is never
/// incrementally patched.
#[derive(Clone,Debug)]
pub struct GroupList {
    groups: Vec<GroupRef>,
    bytes_per_group: usize,
    size: usize
}

impl GroupList {
    pub fn new(bytes_per_group: usize) -> Self {
        Self {
            groups: Vec::new(),
            bytes_per_group,
            size: 0
        }
    }
    pub fn push(&mut self,group: GroupRef) {
        self.groups.push(group);
    }
    pub fn count(&self) -> usize {
        self.groups.len()
    }
    pub fn bytes_per_group(&self) -> usize {
        self.bytes_per_group
    }
    /// total byte size, must not exceed `capacity`
    pub fn size(&self) -> usize {
        self.size
    }
    pub fn set_size(&mut self,size: usize) {
        self.size = size;
    }
    pub fn capacity(&self) -> usize {
        self.groups.len() * self.bytes_per_group
    }
    pub fn first(&self) -> Option<&GroupRef> {
        self.groups.first()
    }
    pub fn last(&self) -> Option<&GroupRef> {
        self.groups.last()
    }
    pub fn iter(&self) -> std::slice::Iter<'_,GroupRef> {
        self.groups.iter()
    }
    pub fn get(&self,idx: usize) -> Option<&GroupRef> {
        self.groups.get(idx)
    }
}

/// Classification of one allocation unit in a full-disk scan
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum UnitState {
    Free,
    Used,
    /// used and terminal in its chain
    UsedLast,
    System
}

/// Counts per `UnitState` produced by a full-disk scan
#[derive(Clone,Copy,Debug,Default)]
pub struct FreeReport {
    pub free: usize,
    pub used: usize,
    pub system: usize,
    pub bytes_per_group: usize
}

impl FreeReport {
    pub fn from_map(map: &[UnitState],bytes_per_group: usize) -> Self {
        let mut ans = Self::default();
        ans.bytes_per_group = bytes_per_group;
        for s in map {
            match s {
                UnitState::Free => ans.free += 1,
                UnitState::Used | UnitState::UsedLast => ans.used += 1,
                UnitState::System => ans.system += 1
            }
        }
        ans
    }
    pub fn free_bytes(&self) -> usize {
        self.free * self.bytes_per_group
    }
}

/// How a directory region is carved into entries.  Formats with a flat
/// record array let the controller walk them generically; hash-table and
/// B-tree directories enumerate through their own codec.
#[derive(Clone,Copy,PartialEq,Eq)]
pub enum DirLayout {
    Flat {
        entry_len: usize,
        /// bytes to skip at the start of every directory sector (chain headers)
        sector_skip: usize,
        /// extra bytes to skip at the start of the first root sector
        root_skip: usize
    },
    /// codec-driven enumeration (Amiga hash chains, HFS catalog)
    Native
}

/// Staging struct for creating or renaming an entry.  Lives only for the
/// duration of one transaction; the codecs validate and commit it.
#[derive(Clone,Debug,Default)]
pub struct DirItemAttr {
    pub name: String,
    pub common: u16,
    /// native type byte override, used when `ignore_type` is false
    pub native_type: Option<u32>,
    pub start_addr: Option<u16>,
    pub end_addr: Option<u16>,
    pub exec_addr: Option<u16>,
    pub datetime: Option<chrono::NaiveDateTime>,
    pub ignore_type: bool,
    pub ignore_date: bool
}

impl DirItemAttr {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

/// Copy a string into a fixed-width field, padding with `pad`.
/// Characters beyond the width are dropped.
pub fn pack_name(s: &str,width: usize,pad: u8) -> Vec<u8> {
    let mut ans = vec![pad;width];
    for (i,b) in s.bytes().enumerate() {
        if i >= width {
            break;
        }
        ans[i] = b;
    }
    ans
}

/// Inverse of `pack_name`, stops at the pad byte and trims trailing pads.
pub fn unpack_name(raw: &[u8],pad: u8) -> String {
    let mut ans = String::new();
    for b in raw {
        if *b == pad && pad != 0x20 {
            break;
        }
        ans.push(match *b {
            x if x >= 0x20 && x < 0x7f => x as char,
            _ => '?'
        });
    }
    ans.trim_end().to_string()
}

/// Fraction of bytes that are printable ASCII, the signal behind the
/// directory validity score.
pub fn printable_fraction(raw: &[u8]) -> f64 {
    if raw.is_empty() {
        return 0.0;
    }
    let good = raw.iter().filter(|b| **b >= 0x20 && **b < 0x7f).count();
    good as f64 / raw.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn name_round_trip() {
        let packed = pack_name("HELLO",8,0x20);
        assert_eq!(packed,b"HELLO   ".to_vec());
        assert_eq!(unpack_name(&packed,0x20),"HELLO");
        let packed = pack_name("PROGRAM NAME TOO LONG",8,0x20);
        assert_eq!(unpack_name(&packed,0x20),"PROGRAM");
    }
    #[test]
    fn group_list_capacity() {
        let mut list = GroupList::new(1024);
        for g in 0..4 {
            list.push(GroupRef::simple(g,0,0,g as usize));
        }
        list.set_size(3584);
        assert_eq!(list.capacity(),4096);
        assert!(list.size() <= list.capacity());
    }
    #[test]
    fn printable_scoring() {
        assert_eq!(printable_fraction(b"GOODNAME"),1.0);
        assert!(printable_fraction(&[0x00,0xff,0x41,0x42]) < 0.6);
    }
}
