//! ### Allocation strategy dispatch
//!
//! `Allocator` is the closed set of allocation strategies, one arm per
//! format family.  Callers hold one of these plus a `SectorStore` and
//! never touch the per-format types directly.  Operations that only make
//! sense for some families (group chains, directory expansion, the
//! TRSDOS hash index) answer `Error::Unsupported` elsewhere.

use crate::store::SectorStore;
use crate::chs::Translator;
use crate::{DYNERR,STDRESULT};
use super::{Error,FormatKind,GroupRef,GroupList,UnitState};
use super::{fat8,fat12,dos3x,c1541,flex,trsdos,amiga,hfs,cpm,mz};

pub enum Allocator {
    Fat8(fat8::Fat8Alloc),
    Fat12(fat12::Fat12Alloc),
    Dos3x(dos3x::Dos3xAlloc),
    C1541(c1541::C1541Alloc),
    Flex(flex::FlexAlloc),
    Trsdos(FormatKind,trsdos::TrsdosAlloc),
    Amiga(amiga::AmigaAlloc),
    Hfs(hfs::HfsAlloc),
    Cpm(cpm::CpmAlloc),
    Mz(mz::MzAlloc)
}

impl Allocator {
    pub fn open(kind: FormatKind,xlat: Translator) -> Self {
        match kind {
            FormatKind::Fat8 => Self::Fat8(fat8::Fat8Alloc::open(xlat)),
            FormatKind::Fat12 => Self::Fat12(fat12::Fat12Alloc::open(xlat)),
            FormatKind::AppleDos => Self::Dos3x(dos3x::Dos3xAlloc::open(xlat)),
            FormatKind::C1541 => Self::C1541(c1541::C1541Alloc::open(xlat)),
            FormatKind::Flex => Self::Flex(flex::FlexAlloc::open(xlat)),
            FormatKind::Trsdos13 | FormatKind::Trsdos2x => Self::Trsdos(kind,trsdos::TrsdosAlloc::open(xlat,kind)),
            FormatKind::AmigaOfs | FormatKind::AmigaFfs => Self::Amiga(amiga::AmigaAlloc::open(xlat,kind)),
            FormatKind::Hfs => Self::Hfs(hfs::HfsAlloc::open(xlat)),
            FormatKind::Cpm => Self::Cpm(cpm::CpmAlloc::open(xlat)),
            FormatKind::MzBasic | FormatKind::Cdos => Self::Mz(mz::MzAlloc::open(xlat,kind))
        }
    }
    pub fn kind(&self) -> FormatKind {
        match self {
            Self::Fat8(_) => FormatKind::Fat8,
            Self::Fat12(_) => FormatKind::Fat12,
            Self::Dos3x(_) => FormatKind::AppleDos,
            Self::C1541(_) => FormatKind::C1541,
            Self::Flex(_) => FormatKind::Flex,
            Self::Trsdos(kind,_) => *kind,
            Self::Amiga(a) => a.kind(),
            Self::Hfs(_) => FormatKind::Hfs,
            Self::Cpm(_) => FormatKind::Cpm,
            Self::Mz(a) => a.kind()
        }
    }
    pub fn end_group(&self) -> u32 {
        match self {
            Self::Fat8(a) => a.end_group(),
            Self::Fat12(a) => a.end_group(),
            Self::Dos3x(a) => a.end_group(),
            Self::C1541(a) => a.end_group(),
            Self::Flex(a) => a.end_group(),
            Self::Trsdos(_,a) => a.end_group(),
            Self::Amiga(a) => a.end_group(),
            Self::Hfs(a) => a.end_group(),
            Self::Cpm(a) => a.end_group(),
            Self::Mz(a) => a.end_group()
        }
    }
    pub fn bytes_per_group(&self) -> usize {
        match self {
            Self::Fat8(a) => a.bytes_per_group(),
            Self::Fat12(a) => a.bytes_per_group(),
            Self::Dos3x(a) => a.bytes_per_group(),
            Self::C1541(a) => a.bytes_per_group(),
            Self::Flex(a) => a.bytes_per_group(),
            Self::Trsdos(_,a) => a.bytes_per_group(),
            Self::Amiga(a) => a.bytes_per_group(),
            Self::Hfs(a) => a.bytes_per_group(),
            Self::Cpm(a) => a.bytes_per_group(),
            Self::Mz(a) => a.bytes_per_group()
        }
    }
    /// bytes of chain header at the front of every data sector
    pub fn data_skip(&self) -> usize {
        match self {
            Self::C1541(a) => a.data_skip(),
            Self::Flex(a) => a.data_skip(),
            Self::Amiga(a) => a.data_skip(),
            _ => 0
        }
    }
    pub fn group_ref(&self,group: u32) -> Result<GroupRef,DYNERR> {
        match self {
            Self::Fat8(a) => a.group_ref(group),
            Self::Fat12(a) => a.group_ref(group),
            Self::Dos3x(a) => a.group_ref(group),
            Self::C1541(a) => a.group_ref(group),
            Self::Flex(a) => a.group_ref(group),
            Self::Trsdos(_,a) => a.group_ref(group),
            Self::Amiga(a) => a.group_ref(group),
            Self::Hfs(a) => a.group_ref(group),
            Self::Cpm(a) => a.group_ref(group),
            Self::Mz(a) => a.group_ref(group)
        }
    }
    pub fn group_value(&self,store: &dyn SectorStore,group: u32) -> Result<u32,DYNERR> {
        match self {
            Self::Fat8(a) => a.group_value(store,group),
            Self::Fat12(a) => a.group_value(store,group),
            Self::Dos3x(a) => a.group_value(store,group),
            Self::C1541(a) => a.group_value(store,group),
            Self::Flex(a) => a.group_value(store,group),
            Self::Trsdos(_,a) => a.group_value(store,group),
            Self::Amiga(a) => a.group_value(store,group),
            Self::Hfs(a) => a.group_value(store,group),
            Self::Cpm(a) => a.group_value(store,group),
            Self::Mz(a) => a.group_value(store,group)
        }
    }
    pub fn set_group_value(&self,store: &mut dyn SectorStore,group: u32,val: u32) -> STDRESULT {
        match self {
            Self::Fat8(a) => a.set_group_value(store,group,val),
            Self::Fat12(a) => a.set_group_value(store,group,val),
            Self::Dos3x(a) => a.set_group_value(store,group,val),
            Self::C1541(a) => a.set_group_value(store,group,val),
            Self::Flex(a) => a.set_group_value(store,group,val),
            Self::Trsdos(_,a) => a.set_group_value(store,group,val),
            Self::Amiga(a) => a.set_group_value(store,group,val),
            Self::Hfs(a) => a.set_group_value(store,group,val),
            Self::Cpm(a) => a.set_group_value(store,group,val),
            Self::Mz(a) => a.set_group_value(store,group,val)
        }
    }
    pub fn is_group_used(&self,store: &dyn SectorStore,group: u32) -> Result<bool,DYNERR> {
        match self {
            Self::Fat8(a) => a.is_group_used(store,group),
            Self::Fat12(a) => a.is_group_used(store,group),
            Self::Dos3x(a) => a.is_group_used(store,group),
            Self::C1541(a) => a.is_group_used(store,group),
            Self::Flex(a) => a.is_group_used(store,group),
            Self::Trsdos(_,a) => a.is_group_used(store,group),
            Self::Amiga(a) => a.is_group_used(store,group),
            Self::Hfs(a) => a.is_group_used(store,group),
            Self::Cpm(a) => a.is_group_used(store,group),
            Self::Mz(a) => a.is_group_used(store,group)
        }
    }
    pub fn next_empty_group(&self,store: &dyn SectorStore,prev: Option<u32>) -> Result<Option<u32>,DYNERR> {
        match self {
            Self::Fat8(a) => a.next_empty_group(store,prev),
            Self::Fat12(a) => a.next_empty_group(store,prev),
            Self::Dos3x(a) => a.next_empty_group(store,prev),
            Self::C1541(a) => a.next_empty_group(store,prev),
            Self::Flex(a) => a.next_empty_group(store,prev),
            Self::Trsdos(_,a) => a.next_empty_group(store,prev),
            Self::Amiga(a) => a.next_empty_group(store,prev),
            Self::Hfs(a) => a.next_empty_group(store,prev),
            Self::Cpm(a) => a.next_empty_group(store,prev),
            Self::Mz(a) => a.next_empty_group(store,prev)
        }
    }
    pub fn allocate_groups(&self,store: &mut dyn SectorStore,size: usize,prev: Option<&GroupList>) -> Result<GroupList,DYNERR> {
        match self {
            Self::Fat8(a) => a.allocate_groups(store,size,prev),
            Self::Fat12(a) => a.allocate_groups(store,size,prev),
            Self::Dos3x(a) => a.allocate_groups(store,size,prev),
            Self::C1541(a) => a.allocate_groups(store,size,prev),
            Self::Flex(a) => a.allocate_groups(store,size,prev),
            Self::Trsdos(_,a) => a.allocate_groups(store,size,prev),
            Self::Amiga(a) => a.allocate_groups(store,size,prev),
            Self::Hfs(a) => a.allocate_groups(store,size,prev),
            Self::Cpm(a) => a.allocate_groups(store,size,prev),
            Self::Mz(a) => a.allocate_groups(store,size,prev)
        }
    }
    pub fn delete_groups(&self,store: &mut dyn SectorStore,list: &GroupList) -> STDRESULT {
        match self {
            Self::Fat8(a) => a.delete_groups(store,list),
            Self::Fat12(a) => a.delete_groups(store,list),
            Self::Dos3x(a) => a.delete_groups(store,list),
            Self::C1541(a) => a.delete_groups(store,list),
            Self::Flex(a) => a.delete_groups(store,list),
            Self::Trsdos(_,a) => a.delete_groups(store,list),
            Self::Amiga(a) => a.delete_groups(store,list),
            Self::Hfs(a) => a.delete_groups(store,list),
            Self::Cpm(a) => a.delete_groups(store,list),
            Self::Mz(a) => a.delete_groups(store,list)
        }
    }
    pub fn disk_free_map(&self,store: &dyn SectorStore) -> Result<Vec<UnitState>,DYNERR> {
        match self {
            Self::Fat8(a) => a.disk_free_map(store),
            Self::Fat12(a) => a.disk_free_map(store),
            Self::Dos3x(a) => a.disk_free_map(store),
            Self::C1541(a) => a.disk_free_map(store),
            Self::Flex(a) => a.disk_free_map(store),
            Self::Trsdos(_,a) => a.disk_free_map(store),
            Self::Amiga(a) => a.disk_free_map(store),
            Self::Hfs(a) => a.disk_free_map(store),
            Self::Cpm(a) => a.disk_free_map(store),
            Self::Mz(a) => a.disk_free_map(store)
        }
    }
    /// walk a linked chain from a start group, for the families that have one
    pub fn chain(&self,store: &dyn SectorStore,start: u32) -> Result<GroupList,DYNERR> {
        match self {
            Self::Fat8(a) => a.chain(store,start),
            Self::Fat12(a) => a.chain(store,start),
            Self::C1541(a) => a.chain(store,start),
            Self::Flex(a) => a.chain(store,start),
            _ => Err(Box::new(Error::Unsupported))
        }
    }
    pub fn check_consistency(&self,store: &dyn SectorStore,formatting: bool) -> f64 {
        match self {
            Self::Fat8(a) => a.check_consistency(store,formatting),
            Self::Fat12(a) => a.check_consistency(store,formatting),
            Self::Dos3x(a) => a.check_consistency(store,formatting),
            Self::C1541(a) => a.check_consistency(store,formatting),
            Self::Flex(a) => a.check_consistency(store,formatting),
            Self::Trsdos(_,a) => a.check_consistency(store,formatting),
            Self::Amiga(a) => a.check_consistency(store,formatting),
            Self::Hfs(a) => a.check_consistency(store,formatting),
            Self::Cpm(a) => a.check_consistency(store,formatting),
            Self::Mz(a) => a.check_consistency(store,formatting)
        }
    }
    pub fn parse_geometry(&mut self,store: &dyn SectorStore,formatting: bool) -> f64 {
        match self {
            Self::Fat8(a) => a.parse_geometry(store,formatting),
            Self::Fat12(a) => a.parse_geometry(store,formatting),
            Self::Dos3x(a) => a.parse_geometry(store,formatting),
            Self::C1541(a) => a.parse_geometry(store,formatting),
            Self::Flex(a) => a.parse_geometry(store,formatting),
            Self::Trsdos(_,a) => a.parse_geometry(store,formatting),
            Self::Amiga(a) => a.parse_geometry(store,formatting),
            Self::Hfs(a) => a.parse_geometry(store,formatting),
            Self::Cpm(a) => a.parse_geometry(store,formatting),
            Self::Mz(a) => a.parse_geometry(store,formatting)
        }
    }
    /// groups holding the root directory region
    pub fn root_groups(&self,store: &dyn SectorStore) -> Result<GroupList,DYNERR> {
        match self {
            Self::Fat8(a) => Ok(a.root_groups(store)),
            Self::Fat12(a) => Ok(a.root_groups(store)),
            Self::Dos3x(a) => a.root_groups(store),
            Self::C1541(a) => a.root_groups(store),
            Self::Flex(a) => a.root_groups(store),
            Self::Trsdos(_,a) => a.root_groups(store),
            Self::Amiga(a) => a.root_groups(store),
            Self::Hfs(a) => a.root_groups(store),
            Self::Cpm(a) => a.root_groups(store),
            Self::Mz(a) => a.root_groups(store)
        }
    }
    /// grow the root directory by one sector where the format allows it
    pub fn expand_root(&self,store: &mut dyn SectorStore) -> Result<Option<GroupRef>,DYNERR> {
        match self {
            Self::C1541(a) => a.expand_root(store),
            Self::Flex(a) => a.expand_root(store),
            _ => Ok(None)
        }
    }
    /// hash index lookup, TRSDOS only
    pub fn hit_get(&self,store: &dyn SectorStore,slot: usize) -> Result<u8,DYNERR> {
        match self {
            Self::Trsdos(_,a) => a.hit_get(store,slot),
            _ => Err(Box::new(Error::Unsupported))
        }
    }
    /// hash index store, TRSDOS only
    pub fn hit_set(&self,store: &mut dyn SectorStore,slot: usize,h: u8) -> STDRESULT {
        match self {
            Self::Trsdos(_,a) => a.hit_set(store,slot,h),
            _ => Ok(())
        }
    }
    pub fn format_disk(&mut self,store: &mut dyn SectorStore,name: &str,vol: u16) -> STDRESULT {
        match self {
            Self::Fat8(a) => a.format_disk(store),
            Self::Fat12(a) => a.format_disk(store),
            Self::Dos3x(a) => a.format_disk(store,vol as u8),
            Self::C1541(a) => {
                let id = [b'0' + (vol / 10 % 10) as u8,b'0' + (vol % 10) as u8];
                a.format_disk(store,name,id)
            },
            Self::Flex(a) => a.format_disk(store,name,vol),
            Self::Trsdos(_,a) => a.format_disk(store,name),
            Self::Amiga(a) => a.format_disk(store,name),
            Self::Hfs(a) => a.format_disk(store,name),
            Self::Cpm(a) => a.format_disk(store),
            Self::Mz(a) => a.format_disk(store)
        }
    }
    /// The stored disk name, `None` where the format keeps none.
    pub fn volume_name(&self,store: &dyn SectorStore) -> Result<Option<String>,DYNERR> {
        match self {
            Self::C1541(a) => Ok(Some(a.volume_name(store)?)),
            Self::Flex(a) => Ok(Some(a.volume_name(store)?)),
            Self::Trsdos(_,a) => Ok(Some(a.volume_name(store)?)),
            Self::Amiga(a) => Ok(Some(a.volume_name(store)?)),
            Self::Hfs(a) => Ok(Some(a.volume_name(store)?)),
            _ => Ok(None)
        }
    }
    /// Relabel the disk, a no-op where the format keeps no name.
    pub fn set_volume_name(&self,store: &mut dyn SectorStore,name: &str) -> STDRESULT {
        match self {
            Self::C1541(a) => a.set_volume_name(store,name),
            Self::Flex(a) => a.set_volume_name(store,name),
            Self::Trsdos(_,a) => a.set_volume_name(store,name),
            Self::Amiga(a) => a.set_volume_name(store,name),
            Self::Hfs(a) => a.set_volume_name(store,name),
            _ => Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::templates;
    use num_traits::FromPrimitive;

    #[test]
    fn every_kind_opens() {
        for i in 0.. {
            let kind = match FormatKind::from_usize(i) {
                Some(k) => k,
                None => break
            };
            let t = templates::template(kind);
            let alloc = Allocator::open(kind,t.translator().expect("bad translator"));
            assert_eq!(alloc.kind(),kind);
            assert!(alloc.end_group() > 0);
            assert!(alloc.bytes_per_group() > 0);
        }
    }
    #[test]
    fn format_then_allocate_marks_used() {
        for kind in [FormatKind::Fat8,FormatKind::Fat12,FormatKind::AppleDos,FormatKind::C1541,
                     FormatKind::Flex,FormatKind::Trsdos13,FormatKind::Trsdos2x,
                     FormatKind::AmigaOfs,FormatKind::Hfs,FormatKind::MzBasic,FormatKind::Cdos] {
            let t = templates::template(kind);
            let mut store = t.blank_store();
            let mut alloc = Allocator::open(kind,t.translator().expect("bad translator"));
            alloc.format_disk(&mut store,"DISK",42).expect("format failed");
            let list = alloc.allocate_groups(&mut store,alloc.bytes_per_group(),None).expect("allocation failed");
            assert_eq!(list.count(),1,"{}",kind);
            let g = list.first().unwrap().group;
            assert!(alloc.is_group_used(&store,g).expect("range"),"{}",kind);
            alloc.delete_groups(&mut store,&list).expect("delete failed");
            assert!(!alloc.is_group_used(&store,g).expect("range"),"{}",kind);
        }
    }
}
