//! ### Directory entry codec dispatch
//!
//! `EntryCodec` is the closed set of entry codecs.  Operations that need
//! allocation context take the `Allocator` as a parameter; handing a
//! codec the wrong allocator family is a structural error, not a panic.
//!
//! `bind` is the commit step of a write: it stamps the freshly allocated
//! group list into the raw entry (start pointer, size field, extent
//! table, or index sectors as the format demands) and returns every
//! directory record that must be stored.  CP/M is the one family where
//! a single file can come back as several records.

use crate::store::SectorStore;
use crate::{DYNERR,STDRESULT};
use super::{Error,FormatKind,FileAttr,GroupList,DirItemAttr,DirLayout};
use super::alloc::Allocator;
use super::{fat8,fat12,dos3x,c1541,flex,trsdos,amiga,hfs,cpm,mz};

pub enum EntryCodec {
    Fat8(fat8::Fat8Entries),
    Fat12(fat12::Fat12Entries),
    Dos3x(dos3x::Dos3xEntries),
    C1541(c1541::C1541Entries),
    Flex(flex::FlexEntries),
    Trsdos(FormatKind,trsdos::TrsdosEntries),
    Amiga(amiga::AmigaEntries),
    Hfs(hfs::HfsEntries),
    Cpm(cpm::CpmEntries),
    Mz(mz::MzEntries)
}

fn mismatch() -> DYNERR {
    Box::new(Error::Structural)
}

impl EntryCodec {
    pub fn new(kind: FormatKind) -> Self {
        match kind {
            FormatKind::Fat8 => Self::Fat8(fat8::Fat8Entries::new()),
            FormatKind::Fat12 => Self::Fat12(fat12::Fat12Entries::new()),
            FormatKind::AppleDos => Self::Dos3x(dos3x::Dos3xEntries::new()),
            FormatKind::C1541 => Self::C1541(c1541::C1541Entries::new()),
            FormatKind::Flex => Self::Flex(flex::FlexEntries::new()),
            FormatKind::Trsdos13 | FormatKind::Trsdos2x => Self::Trsdos(kind,trsdos::TrsdosEntries::new(kind)),
            FormatKind::AmigaOfs | FormatKind::AmigaFfs => Self::Amiga(amiga::AmigaEntries::new(kind)),
            FormatKind::Hfs => Self::Hfs(hfs::HfsEntries::new()),
            FormatKind::Cpm => Self::Cpm(cpm::CpmEntries::new()),
            FormatKind::MzBasic | FormatKind::Cdos => Self::Mz(mz::MzEntries::new(kind))
        }
    }
    pub fn layout(&self) -> DirLayout {
        match self {
            Self::Fat8(c) => c.layout(),
            Self::Fat12(c) => c.layout(),
            Self::Dos3x(c) => c.layout(),
            Self::C1541(c) => c.layout(),
            Self::Flex(c) => c.layout(),
            Self::Trsdos(_,c) => c.layout(),
            Self::Amiga(c) => c.layout(),
            Self::Hfs(c) => c.layout(),
            Self::Cpm(c) => c.layout(),
            Self::Mz(c) => c.layout()
        }
    }
    /// could these bytes be a live or free entry of this format
    pub fn check(&self,raw: &[u8],last: &mut bool) -> bool {
        match self {
            Self::Fat8(c) => c.check(raw,last),
            Self::Fat12(c) => c.check(raw,last),
            Self::Dos3x(c) => c.check(raw,last),
            Self::C1541(c) => c.check(raw,last),
            Self::Flex(c) => c.check(raw,last),
            Self::Trsdos(_,c) => c.check(raw,last),
            Self::Amiga(c) => c.check(raw,last),
            Self::Hfs(c) => c.check(raw,last),
            Self::Cpm(c) => c.check(raw,last),
            Self::Mz(c) => c.check(raw,last)
        }
    }
    pub fn check_used(&self,raw: &[u8],unuse_hint: bool) -> bool {
        match self {
            Self::Fat8(c) => c.check_used(raw,unuse_hint),
            Self::Fat12(c) => c.check_used(raw,unuse_hint),
            Self::Dos3x(c) => c.check_used(raw,unuse_hint),
            Self::C1541(c) => c.check_used(raw,unuse_hint),
            Self::Flex(c) => c.check_used(raw,unuse_hint),
            Self::Trsdos(_,c) => c.check_used(raw,unuse_hint),
            Self::Amiga(c) => c.check_used(raw,unuse_hint),
            Self::Hfs(c) => c.check_used(raw,unuse_hint),
            Self::Cpm(c) => c.check_used(raw,unuse_hint),
            Self::Mz(c) => c.check_used(raw,unuse_hint)
        }
    }
    pub fn name(&self,raw: &[u8]) -> String {
        match self {
            Self::Fat8(c) => c.name(raw),
            Self::Fat12(c) => c.name(raw),
            Self::Dos3x(c) => c.name(raw),
            Self::C1541(c) => c.name(raw),
            Self::Flex(c) => c.name(raw),
            Self::Trsdos(_,c) => c.name(raw),
            Self::Amiga(c) => c.name(raw),
            Self::Hfs(c) => c.name(raw),
            Self::Cpm(c) => c.name(raw),
            Self::Mz(c) => c.name(raw)
        }
    }
    pub fn name_bytes<'a>(&self,raw: &'a [u8]) -> &'a [u8] {
        match self {
            Self::Fat8(c) => c.name_bytes(raw),
            Self::Fat12(c) => c.name_bytes(raw),
            Self::Dos3x(c) => c.name_bytes(raw),
            Self::C1541(c) => c.name_bytes(raw),
            Self::Flex(c) => c.name_bytes(raw),
            Self::Trsdos(_,c) => c.name_bytes(raw),
            Self::Amiga(c) => c.name_bytes(raw),
            Self::Hfs(c) => c.name_bytes(raw),
            Self::Cpm(c) => c.name_bytes(raw),
            Self::Mz(c) => c.name_bytes(raw)
        }
    }
    pub fn get_attr(&self,raw: &[u8]) -> FileAttr {
        match self {
            Self::Fat8(c) => c.get_attr(raw),
            Self::Fat12(c) => c.get_attr(raw),
            Self::Dos3x(c) => c.get_attr(raw),
            Self::C1541(c) => c.get_attr(raw),
            Self::Flex(c) => c.get_attr(raw),
            Self::Trsdos(_,c) => c.get_attr(raw),
            Self::Amiga(c) => c.get_attr(raw),
            Self::Hfs(c) => c.get_attr(raw),
            Self::Cpm(c) => c.get_attr(raw),
            Self::Mz(c) => c.get_attr(raw)
        }
    }
    pub fn set_attr(&self,raw: &mut [u8],attr: &FileAttr) {
        match self {
            Self::Fat8(c) => c.set_attr(raw,attr),
            Self::Fat12(c) => c.set_attr(raw,attr),
            Self::Dos3x(c) => c.set_attr(raw,attr),
            Self::C1541(c) => c.set_attr(raw,attr),
            Self::Flex(c) => c.set_attr(raw,attr),
            Self::Trsdos(_,c) => c.set_attr(raw,attr),
            Self::Amiga(c) => c.set_attr(raw,attr),
            Self::Hfs(c) => c.set_attr(raw,attr),
            Self::Cpm(c) => c.set_attr(raw,attr),
            Self::Mz(c) => c.set_attr(raw,attr)
        }
    }
    pub fn start_group(&self,raw: &[u8]) -> Option<u32> {
        match self {
            Self::Fat8(c) => c.start_group(raw),
            Self::Fat12(c) => c.start_group(raw),
            Self::Dos3x(c) => c.start_group(raw),
            Self::C1541(c) => c.start_group_pair(raw).map(|(t,s)| ((t as u32) << 8) + s as u32),
            Self::Flex(c) => c.start_group_pair(raw).map(|(t,s)| ((t as u32) << 8) + s as u32),
            Self::Trsdos(_,c) => c.start_group(raw),
            Self::Amiga(c) => c.start_group(raw),
            Self::Hfs(c) => c.start_group(raw),
            Self::Cpm(c) => c.start_group(raw),
            Self::Mz(c) => c.start_group(raw)
        }
    }
    /// every data group the entry reaches, in file order
    pub fn groups(&self,store: &dyn SectorStore,alloc: &Allocator,raw: &[u8]) -> Result<GroupList,DYNERR> {
        match (self,alloc) {
            (Self::Fat8(c),Allocator::Fat8(a)) => c.groups(store,a,raw),
            (Self::Fat12(c),Allocator::Fat12(a)) => c.groups(store,a,raw),
            (Self::Dos3x(c),Allocator::Dos3x(a)) => c.groups(store,a,raw),
            (Self::C1541(c),Allocator::C1541(a)) => c.groups(store,a,raw),
            (Self::Flex(c),Allocator::Flex(a)) => c.groups(store,a,raw),
            (Self::Trsdos(_,c),Allocator::Trsdos(_,a)) => c.groups(store,a,raw),
            (Self::Amiga(c),Allocator::Amiga(a)) => c.groups(store,a,raw),
            (Self::Hfs(c),Allocator::Hfs(a)) => c.groups(store,a,raw),
            (Self::Cpm(c),Allocator::Cpm(a)) => c.groups(store,a,raw),
            (Self::Mz(c),Allocator::Mz(a)) => c.groups(store,a,raw),
            _ => Err(mismatch())
        }
    }
    /// index structures the entry owns besides its data (track/sector
    /// lists, extension blocks); freed along with the data on delete
    pub fn index_groups(&self,store: &dyn SectorStore,alloc: &Allocator,raw: &[u8]) -> Result<GroupList,DYNERR> {
        match (self,alloc) {
            (Self::Dos3x(c),Allocator::Dos3x(a)) => c.index_groups(store,a,raw),
            (Self::Amiga(c),Allocator::Amiga(a)) => c.index_groups(store,a,raw),
            _ => Ok(GroupList::new(alloc.bytes_per_group()))
        }
    }
    pub fn file_size(&self,store: &dyn SectorStore,alloc: &Allocator,raw: &[u8],list: &GroupList) -> usize {
        match (self,alloc) {
            (Self::Fat8(c),Allocator::Fat8(a)) => c.file_size(store,a,raw,list),
            (Self::Fat12(c),Allocator::Fat12(a)) => c.file_size(store,a,raw,list),
            (Self::Dos3x(c),Allocator::Dos3x(a)) => c.file_size(store,a,raw,list),
            (Self::C1541(c),Allocator::C1541(a)) => c.file_size(store,a,raw,list),
            (Self::Flex(c),Allocator::Flex(a)) => c.file_size(store,a,raw,list),
            (Self::Trsdos(_,c),Allocator::Trsdos(_,a)) => c.file_size(store,a,raw,list),
            (Self::Amiga(c),Allocator::Amiga(a)) => c.file_size(store,a,raw,list),
            (Self::Hfs(c),Allocator::Hfs(a)) => c.file_size(store,a,raw,list),
            (Self::Cpm(c),Allocator::Cpm(a)) => c.file_size(store,a,raw,list),
            (Self::Mz(c),Allocator::Mz(a)) => c.file_size(store,a,raw,list),
            _ => list.size()
        }
    }
    /// Build a fresh raw entry from the staging attributes.  The hash
    /// table and B-tree directories write their entries through their
    /// own codecs instead.
    pub fn create(&self,attr: &DirItemAttr,start: u32) -> Result<Vec<u8>,DYNERR> {
        match self {
            Self::Fat8(c) => c.create(attr,start),
            Self::Fat12(c) => c.create(attr,start),
            Self::Dos3x(c) => c.create(attr,start),
            Self::C1541(c) => c.create(attr,start),
            Self::Flex(c) => c.create(attr,start),
            Self::Trsdos(_,c) => c.create(attr,start),
            Self::Amiga(c) => c.create(attr,start),
            Self::Hfs(_) => Err(Box::new(Error::Unsupported)),
            Self::Cpm(c) => c.create(attr,start),
            Self::Mz(c) => c.create(attr,start)
        }
    }
    /// Stamp the allocated groups into the entry and return every record
    /// to be stored.  The entry passed in is consumed into the result.
    pub fn bind(&self,store: &mut dyn SectorStore,alloc: &Allocator,mut raw: Vec<u8>,data: &GroupList) -> Result<Vec<Vec<u8>>,DYNERR> {
        let start = data.first().map(|r| r.group).unwrap_or(0);
        match (self,alloc) {
            (Self::Fat8(_),Allocator::Fat8(_)) => Ok(vec![raw]),
            (Self::Fat12(c),Allocator::Fat12(_)) => {
                c.set_start_group(&mut raw,start);
                c.set_file_size(&mut raw,data.size());
                Ok(vec![raw])
            },
            (Self::Dos3x(c),Allocator::Dos3x(a)) => {
                let tsl = c.write_index(store,a,data)?;
                c.set_index(&mut raw,a,&tsl,data.count());
                Ok(vec![raw])
            },
            (Self::C1541(c),Allocator::C1541(a)) => {
                c.set_start(&mut raw,a,data)?;
                Ok(vec![raw])
            },
            (Self::Flex(c),Allocator::Flex(a)) => {
                c.set_start(&mut raw,a,data)?;
                Ok(vec![raw])
            },
            (Self::Trsdos(_,c),Allocator::Trsdos(_,a)) => {
                c.set_extents(&mut raw,a,data)?;
                Ok(vec![raw])
            },
            (Self::Cpm(c),Allocator::Cpm(_)) => c.build_extents(&raw,data),
            (Self::Mz(c),Allocator::Mz(_)) => {
                c.set_start_and_size(&mut raw,start,data.size());
                Ok(vec![raw])
            },
            _ => Err(mismatch())
        }
    }
    /// starting token for native directory enumeration (root block or
    /// catalog node id)
    pub fn root_token(&self,alloc: &Allocator) -> Option<u32> {
        match alloc {
            Allocator::Amiga(a) => Some(a.root_block()),
            Allocator::Hfs(_) => Some(hfs::ROOT_CNID),
            _ => None
        }
    }
    /// entries of a hash table or B-tree directory, as (token, raw) pairs;
    /// a directory entry's token can be enumerated in turn
    pub fn enumerate(&self,store: &dyn SectorStore,alloc: &Allocator,token: u32) -> Result<Vec<(u32,Vec<u8>)>,DYNERR> {
        match (self,alloc) {
            (Self::Amiga(c),Allocator::Amiga(a)) => {
                let mut ans = Vec::new();
                for block in c.enumerate(store,a,token)? {
                    ans.push((block,a.read_block(store,block)?));
                }
                Ok(ans)
            },
            (Self::Hfs(c),Allocator::Hfs(a)) => {
                let mut ans = Vec::new();
                for raw in c.enumerate(store,a,token)? {
                    ans.push((c.cnid(&raw),raw));
                }
                Ok(ans)
            },
            _ => Err(mismatch())
        }
    }
    pub fn rename(&self,raw: &mut [u8],name: &str) -> STDRESULT {
        match self {
            Self::Fat8(c) => c.rename(raw,name),
            Self::Fat12(c) => c.rename(raw,name),
            Self::Dos3x(c) => c.rename(raw,name),
            Self::C1541(c) => c.rename(raw,name),
            Self::Flex(c) => c.rename(raw,name),
            Self::Trsdos(_,c) => c.rename(raw,name),
            Self::Amiga(c) => c.rename(raw,name),
            Self::Hfs(_) => Err(Box::new(Error::Unsupported)),
            Self::Cpm(c) => c.rename(raw,name),
            Self::Mz(c) => c.rename(raw,name)
        }
    }
    pub fn tombstone(&self,raw: &mut [u8]) {
        match self {
            Self::Fat8(c) => c.tombstone(raw),
            Self::Fat12(c) => c.tombstone(raw),
            Self::Dos3x(c) => c.tombstone(raw),
            Self::C1541(c) => c.tombstone(raw),
            Self::Flex(c) => c.tombstone(raw),
            Self::Trsdos(_,c) => c.tombstone(raw),
            Self::Amiga(c) => c.tombstone(raw),
            Self::Hfs(_) => {},
            Self::Cpm(c) => c.tombstone(raw),
            Self::Mz(c) => c.tombstone(raw)
        }
    }
    /// whether two records describe the same file (CP/M extents)
    pub fn same_file(&self,a: &[u8],b: &[u8]) -> bool {
        match self {
            Self::Cpm(c) => c.same_file(a,b),
            _ => false
        }
    }
    /// name hash for the TRSDOS hash index table
    pub fn name_hash(&self,raw: &[u8]) -> Option<u8> {
        match self {
            Self::Trsdos(_,c) => Some(c.name_hash(raw)),
            _ => None
        }
    }
    pub fn has_date(&self) -> bool {
        match self {
            Self::Fat8(c) => c.has_date(),
            Self::Fat12(c) => c.has_date(),
            Self::Dos3x(c) => c.has_date(),
            Self::C1541(c) => c.has_date(),
            Self::Flex(c) => c.has_date(),
            Self::Trsdos(_,c) => c.has_date(),
            Self::Amiga(c) => c.has_date(),
            Self::Hfs(c) => c.has_date(),
            Self::Cpm(c) => c.has_date(),
            Self::Mz(c) => c.has_date()
        }
    }
    pub fn get_date(&self,raw: &[u8]) -> Option<chrono::NaiveDateTime> {
        match self {
            Self::Fat12(c) => c.get_date(raw),
            Self::Flex(c) => c.get_date(raw),
            Self::Trsdos(_,c) => c.get_date(raw),
            Self::Amiga(c) => c.get_date(raw),
            Self::Hfs(c) => c.get_date(raw),
            Self::Mz(c) => c.get_date(raw),
            _ => None
        }
    }
    pub fn set_date(&self,raw: &mut [u8],dt: chrono::NaiveDateTime) {
        match self {
            Self::Fat12(c) => c.set_date(raw,dt),
            Self::Flex(c) => c.set_date(raw,dt),
            Self::Amiga(c) => c.set_date(raw,dt),
            Self::Hfs(c) => c.set_date(raw,dt),
            _ => {}
        }
    }
    pub fn has_addresses(&self) -> bool {
        match self {
            Self::Dos3x(c) => c.has_addresses(),
            Self::Mz(c) => c.has_addresses(),
            _ => false
        }
    }
    pub fn start_addr(&self,store: &dyn SectorStore,raw: &[u8],list: &GroupList) -> Option<u16> {
        match self {
            Self::Dos3x(c) => c.start_addr(store,raw,list),
            Self::Mz(c) => c.start_addr(raw),
            _ => None
        }
    }
    pub fn exec_addr(&self,raw: &[u8]) -> Option<u16> {
        match self {
            Self::Mz(c) => c.exec_addr(raw),
            _ => None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::templates;

    #[test]
    fn wrong_allocator_family_is_structural() {
        let t = templates::template(FormatKind::Fat8);
        let store = t.blank_store();
        let alloc = Allocator::open(FormatKind::Cpm,templates::template(FormatKind::Cpm).translator().expect("bad translator"));
        let codec = EntryCodec::new(FormatKind::Fat8);
        let raw = codec.create(&super::super::DirItemAttr::named("A"),1).expect("create failed");
        match codec.groups(&store,&alloc,&raw) {
            Err(e) => assert_eq!(e.to_string(),Error::Structural.to_string()),
            Ok(_) => panic!("expected refusal")
        };
    }
    #[test]
    fn attr_round_trip_is_idempotent() {
        let cases = [
            (FormatKind::Fat8,"PROG.BAS"),
            (FormatKind::Fat12,"README.TXT"),
            (FormatKind::AppleDos,"HELLO"),
            (FormatKind::C1541,"GAME"),
            (FormatKind::Flex,"REPORT.TXT"),
            (FormatKind::Trsdos13,"PAYROLL"),
            (FormatKind::Trsdos2x,"PAYROLL"),
            (FormatKind::AmigaOfs,"Startup"),
            (FormatKind::Cpm,"STAT.COM"),
            (FormatKind::MzBasic,"ADVENTURE"),
            (FormatKind::Cdos,"BACKUP.BIN")
        ];
        for (kind,name) in cases {
            let codec = EntryCodec::new(kind);
            let raw = codec.create(&super::super::DirItemAttr::named(name),2).expect("create failed");
            let attr = codec.get_attr(&raw);
            let mut copy = raw.clone();
            codec.set_attr(&mut copy,&attr);
            assert_eq!(copy,raw,"{} attr round trip",kind);
        }
    }
}
