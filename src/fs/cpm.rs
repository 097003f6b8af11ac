//! ### CP/M file system
//!
//! There is no allocation table on disk.  The directory region, the first
//! blocks after the reserved system tracks, is the only metadata: every
//! live extent entry names the blocks it owns, and the free map is
//! derived by scanning the directory.  Freeing storage is therefore
//! nothing but tombstoning entries.
//!
//! A file larger than one extent's 16 pointers continues in further
//! entries with the same name and an incremented extent counter.  Record
//! counts are in 128 byte units.

use log::debug;
use crate::store::SectorStore;
use crate::chs::Translator;
use crate::{DYNERR,STDRESULT};
use super::{Error,FormatKind,FileAttr,GroupRef,GroupList,UnitState,DirItemAttr,DirLayout};

pub const ENTRY_LEN: usize = 32;
pub const RECORD_LEN: usize = 128;
pub const PTRS_PER_EXTENT: usize = 16;
/// records per logical extent
pub const RECS_PER_EXTENT: usize = 128;
pub const FREE_USER: u8 = 0xe5;
pub const MAX_USER: u8 = 15;

/// Disk parameter fields, the subset of a DPB this layer needs
#[derive(Clone,Copy)]
pub struct Params {
    pub boot_tracks: usize,
    pub block_size: usize,
    pub dir_blocks: usize,
    pub dir_entries: usize
}

impl Params {
    /// the 8 inch SSSD reference layout
    pub fn sssd() -> Self {
        Self {
            boot_tracks: 2,
            block_size: 1024,
            dir_blocks: 2,
            dir_entries: 64
        }
    }
}

/// Allocation strategy with a directory-derived free map.
pub struct CpmAlloc {
    xlat: Translator,
    sec_size: usize,
    params: Params
}

impl CpmAlloc {
    pub fn open(xlat: Translator) -> Self {
        let sec_size = 128;
        Self {
            xlat,
            sec_size,
            params: Params::sssd()
        }
    }
    pub fn xlat(&self) -> &Translator {
        &self.xlat
    }
    fn secs_per_block(&self) -> usize {
        self.params.block_size / self.sec_size
    }
    fn data_base(&self) -> usize {
        self.params.boot_tracks * self.xlat.sectors(0) * self.xlat.side_count()
    }
    pub fn end_group(&self) -> u32 {
        ((self.xlat.positions() - self.data_base()) / self.secs_per_block()) as u32
    }
    pub fn bytes_per_group(&self) -> usize {
        self.params.block_size
    }
    pub fn group_ref(&self,group: u32) -> Result<GroupRef,DYNERR> {
        if group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        let spb = self.secs_per_block();
        let pos0 = self.data_base() + group as usize * spb;
        let (track,side,sec0) = self.xlat.store_coords(pos0)?;
        let (_,_,sec1) = self.xlat.store_coords(pos0 + spb - 1)?;
        Ok(GroupRef {
            group,
            track,
            side,
            sector_start: sec0,
            sector_end: sec1,
            div: None,
            tag: 0
        })
    }
    /// Scan the directory and mark every referenced block.
    fn used_map(&self,store: &dyn SectorStore) -> Result<Vec<bool>,DYNERR> {
        let mut used = vec![false;self.end_group() as usize];
        for g in 0..self.params.dir_blocks {
            used[g] = true;
        }
        for raw in self.raw_entries(store)? {
            if raw[0] > MAX_USER {
                continue;
            }
            for p in 0..PTRS_PER_EXTENT {
                let blk = raw[16+p] as usize;
                if blk > 0 && blk < used.len() {
                    used[blk] = true;
                }
            }
        }
        Ok(used)
    }
    /// every raw directory entry, live or not
    pub fn raw_entries(&self,store: &dyn SectorStore) -> Result<Vec<Vec<u8>>,DYNERR> {
        let mut ans = Vec::new();
        for r in self.root_groups(store)?.iter() {
            for sec in r.sector_start..=r.sector_end {
                let buf = store.read_sector(r.track,r.side,sec)?;
                for e in 0..buf.len()/ENTRY_LEN {
                    ans.push(buf[e*ENTRY_LEN..(e+1)*ENTRY_LEN].to_vec());
                }
            }
        }
        Ok(ans)
    }
    pub fn is_group_used(&self,store: &dyn SectorStore,group: u32) -> Result<bool,DYNERR> {
        if group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        Ok(self.used_map(store)?[group as usize])
    }
    pub fn group_value(&self,store: &dyn SectorStore,group: u32) -> Result<u32,DYNERR> {
        Ok(match self.is_group_used(store,group)? {
            true => 1,
            false => 0
        })
    }
    /// Used state is implied by the directory; there is nothing to write.
    pub fn set_group_value(&self,_store: &mut dyn SectorStore,_group: u32,_val: u32) -> STDRESULT {
        Err(Box::new(Error::Unsupported))
    }
    pub fn next_empty_group(&self,store: &dyn SectorStore,prev: Option<u32>) -> Result<Option<u32>,DYNERR> {
        let used = self.used_map(store)?;
        let start = match prev {
            Some(p) => p as usize + 1,
            None => self.params.dir_blocks
        };
        for g in start..used.len() {
            if !used[g] {
                return Ok(Some(g as u32));
            }
        }
        Ok(None)
    }
    /// Pick free blocks ascending.  The reservation only becomes durable
    /// when the caller writes the extent entries that name these blocks.
    pub fn allocate_groups(&self,store: &mut dyn SectorStore,size: usize,prev: Option<&GroupList>) -> Result<GroupList,DYNERR> {
        let bpg = self.bytes_per_group();
        let needed = match size {
            0 => 0,
            s => (s + bpg - 1) / bpg
        };
        let used = self.used_map(store)?;
        let mut list = GroupList::new(bpg);
        let mut free: Vec<u32> = (self.params.dir_blocks as u32..self.end_group())
            .filter(|g| !used[*g as usize]).collect();
        if free.len() < needed {
            debug!("need {} blocks, {} free",needed,free.len());
            return Err(match prev.map(|p| p.count()).unwrap_or(0) {
                0 => Box::new(Error::NoSpaceBeforeStart),
                _ => Box::new(Error::NoSpaceAfterStart)
            });
        }
        for g in free.drain(0..needed) {
            list.push(self.group_ref(g)?);
        }
        list.set_size(size);
        Ok(list)
    }
    /// Nothing to clear; the caller tombstones the extent entries.
    pub fn delete_groups(&self,_store: &mut dyn SectorStore,_list: &GroupList) -> STDRESULT {
        Ok(())
    }
    pub fn disk_free_map(&self,store: &dyn SectorStore) -> Result<Vec<UnitState>,DYNERR> {
        let used = self.used_map(store)?;
        let mut ans = Vec::new();
        for g in 0..self.end_group() as usize {
            ans.push(match (used[g],g < self.params.dir_blocks) {
                (_,true) => UnitState::System,
                (true,false) => UnitState::Used,
                (false,false) => UnitState::Free
            });
        }
        Ok(ans)
    }
    pub fn check_consistency(&self,store: &dyn SectorStore,formatting: bool) -> f64 {
        if formatting {
            return 0.0;
        }
        let entries = match self.raw_entries(store) {
            Ok(e) => e,
            Err(_) => return -1.0
        };
        let mut live = 0;
        let mut bad = 0;
        for raw in &entries {
            if raw[0] == FREE_USER {
                continue;
            }
            if raw[0] > MAX_USER {
                bad += 1;
                continue;
            }
            live += 1;
            let mut name: Vec<u8> = raw[1..12].iter().map(|b| b & 0x7f).collect();
            name.retain(|b| *b != 0x20);
            if super::printable_fraction(&name) < 1.0 {
                bad += 1;
            }
            for p in 0..PTRS_PER_EXTENT {
                if raw[16+p] as u32 >= self.end_group() {
                    bad += 1;
                    break;
                }
            }
        }
        if bad > 0 && bad*4 > entries.len() {
            debug!("directory rejected with {} bad entries",bad);
            return -1.0;
        }
        // an empty but clean directory is weak evidence on an 0xe5 fill
        match live {
            0 => 0.1,
            _ => 1.0 - bad as f64 / live as f64
        }
    }
    pub fn parse_geometry(&mut self,store: &dyn SectorStore,_formatting: bool) -> f64 {
        if store.track_count() != self.xlat.track_count() {
            debug!("declared geometry disagrees with the image");
            return -1.0;
        }
        1.0
    }
    /// The fixed directory blocks at the start of the data area.
    pub fn root_groups(&self,_store: &dyn SectorStore) -> Result<GroupList,DYNERR> {
        let mut list = GroupList::new(self.sec_size);
        let spb = self.secs_per_block();
        for b in 0..self.params.dir_blocks {
            for s in 0..spb {
                let (t,side,sec) = self.xlat.store_coords(self.data_base() + b*spb + s)?;
                list.push(GroupRef::simple(b as u32,t,side,sec));
            }
        }
        list.set_size(list.capacity());
        Ok(list)
    }
    pub fn slot_count(&self) -> usize {
        self.params.dir_entries
    }
    pub fn format_disk(&self,store: &mut dyn SectorStore) -> STDRESULT {
        let fill = vec![FREE_USER;self.sec_size];
        for r in self.root_groups(store)?.iter() {
            for sec in r.sector_start..=r.sector_end {
                store.write_sector(r.track,r.side,sec,&fill)?;
            }
        }
        Ok(())
    }
}

/// Directory entry codec: user byte, 8+3 name with flag bits in the high
/// bits, extent counter, record count, 16 block pointers.
/// flag bits ride the high bits of the name field
fn apply_flags(raw: &mut [u8],ro: bool,sys: bool,arc: bool) {
    raw[9] = raw[9] & 0x7f | ((ro as u8) << 7);
    raw[10] = raw[10] & 0x7f | ((sys as u8) << 7);
    raw[11] = raw[11] & 0x7f | ((arc as u8) << 7);
}

pub struct CpmEntries {
}

impl CpmEntries {
    pub fn new() -> Self {
        Self {}
    }
    pub fn layout(&self) -> DirLayout {
        DirLayout::Flat {entry_len: ENTRY_LEN, sector_skip: 0, root_skip: 0}
    }
    pub fn check(&self,raw: &[u8],_last: &mut bool) -> bool {
        if raw.len() < ENTRY_LEN {
            return false;
        }
        raw[0] <= MAX_USER || raw[0] == FREE_USER
    }
    /// only the first extent of a file counts as the visible entry
    pub fn check_used(&self,raw: &[u8],unuse_hint: bool) -> bool {
        if raw[0] > MAX_USER {
            return false;
        }
        match unuse_hint {
            true => true,
            false => raw[12] == 0
        }
    }
    pub fn name(&self,raw: &[u8]) -> String {
        let base: Vec<u8> = raw[1..9].iter().map(|b| b & 0x7f).collect();
        let ext: Vec<u8> = raw[9..12].iter().map(|b| b & 0x7f).collect();
        let base = super::unpack_name(&base,0x20);
        let ext = super::unpack_name(&ext,0x20);
        match ext.len() {
            0 => base,
            _ => [base,".".to_string(),ext].concat()
        }
    }
    pub fn name_bytes<'a>(&self,raw: &'a [u8]) -> &'a [u8] {
        &raw[1..12]
    }
    /// name comparison must ignore the flag bits
    pub fn same_file(&self,a: &[u8],b: &[u8]) -> bool {
        a[0] == b[0] && a[1..12].iter().zip(b[1..12].iter()).all(|(x,y)| x & 0x7f == y & 0x7f)
    }
    pub fn get_attr(&self,raw: &[u8]) -> FileAttr {
        let mut common = super::BINARY;
        if raw[9] & 0x80 > 0 {
            common |= super::READ_ONLY;
        }
        if raw[10] & 0x80 > 0 {
            common |= super::SYSTEM | super::HIDDEN;
        }
        let flags = ((raw[9] >> 7) | ((raw[10] >> 6) & 2) | ((raw[11] >> 5) & 4)) as u32;
        FileAttr {
            format: FormatKind::Cpm,
            common,
            origin: [flags,raw[0] as u32,0]
        }
    }
    pub fn set_attr(&self,raw: &mut [u8],attr: &FileAttr) {
        let (ro,sys,arc) = match attr.format == FormatKind::Cpm {
            true => (attr.origin[0] & 1 > 0,attr.origin[0] & 2 > 0,attr.origin[0] & 4 > 0),
            false => (attr.common & super::READ_ONLY > 0,attr.common & super::SYSTEM > 0,false)
        };
        apply_flags(raw,ro,sys,arc);
    }
    pub fn start_group(&self,raw: &[u8]) -> Option<u32> {
        if !self.check_used(raw,true) {
            return None;
        }
        match raw[16] {
            0 => None,
            b => Some(b as u32)
        }
    }
    /// Gather every extent of this entry's file, in extent order, and
    /// expand the block pointers.
    pub fn groups(&self,store: &dyn SectorStore,alloc: &CpmAlloc,raw: &[u8]) -> Result<GroupList,DYNERR> {
        let mut list = GroupList::new(alloc.bytes_per_group());
        if !self.check_used(raw,true) {
            return Ok(list);
        }
        let mut extents: Vec<Vec<u8>> = alloc.raw_entries(store)?.into_iter()
            .filter(|e| e[0] <= MAX_USER && self.same_file(e,raw))
            .collect();
        extents.sort_by_key(|e| e[12]);
        let mut size = 0;
        for e in &extents {
            for p in 0..PTRS_PER_EXTENT {
                let blk = e[16+p] as u32;
                if blk > 0 {
                    list.push(alloc.group_ref(blk)?);
                }
            }
            size += e[15] as usize * RECORD_LEN;
        }
        list.set_size(usize::min(size,list.capacity()));
        Ok(list)
    }
    pub fn file_size(&self,_store: &dyn SectorStore,_alloc: &CpmAlloc,_raw: &[u8],list: &GroupList) -> usize {
        list.size()
    }
    /// Split a block list into the extent entries that must be written to
    /// free directory slots.  The first element replaces the original
    /// entry; the rest are continuation extents.
    pub fn build_extents(&self,proto: &[u8],list: &GroupList) -> Result<Vec<Vec<u8>>,DYNERR> {
        let count = usize::max(1,(list.count() + PTRS_PER_EXTENT - 1) / PTRS_PER_EXTENT);
        let total_recs = (list.size() + RECORD_LEN - 1) / RECORD_LEN;
        let mut ans = Vec::new();
        for x in 0..count {
            let mut raw = proto.to_vec();
            raw[12] = x as u8;
            raw[13] = 0;
            raw[14] = 0;
            let recs = usize::min(total_recs - x*RECS_PER_EXTENT,RECS_PER_EXTENT);
            raw[15] = recs as u8;
            for p in 0..PTRS_PER_EXTENT {
                raw[16+p] = match list.get(x*PTRS_PER_EXTENT + p) {
                    Some(r) => r.group as u8,
                    None => 0
                };
            }
            ans.push(raw);
        }
        Ok(ans)
    }
    pub fn create(&self,attr: &DirItemAttr,start: u32) -> Result<Vec<u8>,DYNERR> {
        let (base,ext) = match attr.name.split_once('.') {
            Some((b,x)) => (b.to_string(),x.to_string()),
            None => (attr.name.clone(),String::new())
        };
        if base.is_empty() || base.len() > 8 || ext.len() > 3 || !base.is_ascii() {
            return Err(Box::new(Error::BadName));
        }
        for c in [base.as_str(),ext.as_str()].concat().chars() {
            if "<>.,;:=?*[]".contains(c) || (c as u8) < 0x21 {
                return Err(Box::new(Error::BadName));
            }
        }
        let mut raw = vec![0;ENTRY_LEN];
        raw[1..9].copy_from_slice(&super::pack_name(&base.to_uppercase(),8,0x20));
        raw[9..12].copy_from_slice(&super::pack_name(&ext.to_uppercase(),3,0x20));
        if !attr.ignore_type {
            apply_flags(&mut raw,attr.common & super::READ_ONLY > 0,attr.common & super::SYSTEM > 0,false);
        }
        raw[16] = start as u8;
        Ok(raw)
    }
    pub fn rename(&self,raw: &mut [u8],name: &str) -> STDRESULT {
        let probe = self.create(&DirItemAttr::named(name),0)?;
        // keep the flag bits
        for i in 1..12 {
            raw[i] = probe[i] & 0x7f | (raw[i] & 0x80);
        }
        Ok(())
    }
    pub fn tombstone(&self,raw: &mut [u8]) {
        raw[0] = FREE_USER;
    }
    pub fn has_date(&self) -> bool {
        false
    }
    pub fn has_addresses(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::templates;
    use crate::fs::FormatKind;

    fn setup() -> (crate::store::MemStore,CpmAlloc) {
        let t = templates::template(FormatKind::Cpm);
        let mut store = t.blank_store();
        let alloc = CpmAlloc::open(t.translator().expect("bad translator"));
        alloc.format_disk(&mut store).expect("format failed");
        (store,alloc)
    }
    /// write extent entries into the first free slots
    fn commit(store: &mut crate::store::MemStore,alloc: &CpmAlloc,extents: &[Vec<u8>]) {
        let root = alloc.root_groups(store).expect("bad dir");
        let mut slot = 0;
        let mut next = 0;
        for r in root.iter() {
            for sec in r.sector_start..=r.sector_end {
                let mut buf = store.read_sector(r.track,r.side,sec).expect("io");
                for e in 0..buf.len()/ENTRY_LEN {
                    if buf[e*ENTRY_LEN] == FREE_USER && next < extents.len() {
                        buf[e*ENTRY_LEN..(e+1)*ENTRY_LEN].copy_from_slice(&extents[next]);
                        next += 1;
                    }
                    slot += 1;
                }
                store.write_sector(r.track,r.side,sec,&buf).expect("io");
            }
        }
        assert!(next == extents.len(),"only {} of {} extents placed in {} slots",next,extents.len(),slot);
    }
    #[test]
    fn blank_disk_is_all_free() {
        let (store,alloc) = setup();
        let map = alloc.disk_free_map(&store).expect("io");
        assert_eq!(map[0],UnitState::System);
        assert_eq!(map[1],UnitState::System);
        assert!(map[2..].iter().all(|s| *s==UnitState::Free));
    }
    #[test]
    fn used_state_derives_from_directory() {
        let (mut store,alloc) = setup();
        let codec = CpmEntries::new();
        let list = alloc.allocate_groups(&mut store,3000,None).expect("allocation failed");
        // not yet durable
        assert!(!alloc.is_group_used(&store,list.first().unwrap().group).expect("range"));
        let proto = codec.create(&DirItemAttr::named("LEDGER.DAT"),0).expect("bad entry");
        let extents = codec.build_extents(&proto,&list).expect("bad extents");
        commit(&mut store,&alloc,&extents);
        for r in list.iter() {
            assert!(alloc.is_group_used(&store,r.group).expect("range"));
        }
    }
    #[test]
    fn large_file_spans_extents() {
        let (mut store,alloc) = setup();
        let codec = CpmEntries::new();
        // 20 blocks needs two extent entries
        let list = alloc.allocate_groups(&mut store,20*1024,None).expect("allocation failed");
        let proto = codec.create(&DirItemAttr::named("BIG.DAT"),0).expect("bad entry");
        let extents = codec.build_extents(&proto,&list).expect("bad extents");
        assert_eq!(extents.len(),2);
        assert_eq!(extents[0][12],0);
        assert_eq!(extents[1][12],1);
        commit(&mut store,&alloc,&extents);
        let walked = codec.groups(&store,&alloc,&extents[0]).expect("walk failed");
        assert_eq!(walked.count(),20);
        assert_eq!(walked.size(),20*1024);
    }
    #[test]
    fn flag_bits_ride_the_name() {
        let codec = CpmEntries::new();
        let mut raw = codec.create(&DirItemAttr::named("SAFE.COM"),0).expect("bad entry");
        let mut attr = codec.get_attr(&raw);
        attr.common |= crate::fs::READ_ONLY;
        attr.origin[0] |= 1;
        codec.set_attr(&mut raw,&attr);
        assert!(raw[9] & 0x80 > 0);
        assert_eq!(codec.name(&raw),"SAFE.COM");
        let round = codec.get_attr(&raw);
        assert!(round.is_set(crate::fs::READ_ONLY));
    }
}
