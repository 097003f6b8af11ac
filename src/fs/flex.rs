//! ### FLEX file system
//!
//! FLEX threads every free sector into one singly linked chain whose head
//! and tail live in the System Information Record, track 0 sector 3.
//! Sector headers carry the link: bytes 0 and 1 are the next track and
//! sector, bytes 2 and 3 the big-endian record number, leaving 252 data
//! bytes.  Allocation pops a run off the head of the free chain; deletion
//! appends the file's chain to the tail, so a freshly formatted disk
//! allocates in strictly ascending order and a well-used one does not.
//!
//! Sectors are numbered 1 through N per track, track and sector together
//! forming the on-disk address pair.

use log::{trace,debug};
use chrono::Datelike;
use crate::store::{SectorStore,patch_sector};
use crate::chs::Translator;
use crate::{DYNERR,STDRESULT};
use super::{Error,FormatKind,FileAttr,GroupRef,GroupList,UnitState,DirItemAttr,DirLayout};

pub const SIR_SECTOR: usize = 3;
pub const FIRST_DIR_SECTOR: usize = 5;
pub const ENTRY_LEN: usize = 24;
pub const DIR_SKIP: usize = 16;
pub const DATA_SKIP: usize = 4;
pub const DATA_PER_SECTOR: usize = 252;
const DELETED: u8 = 0xff;

// attribute bits
pub const WRITE_PROTECT: u8 = 0x80;
pub const DELETE_PROTECT: u8 = 0x40;
pub const READ_PROTECT: u8 = 0x20;
pub const CATALOG_PROTECT: u8 = 0x10;

/// System Information Record fields
#[derive(Clone,Copy)]
struct Sir {
    free_head: (u8,u8),
    free_tail: (u8,u8),
    free_count: u16,
    max_track: usize,
    max_sector: usize
}

impl Sir {
    fn from_sector(buf: &[u8]) -> Option<Self> {
        if buf.len() < 0x28 {
            return None;
        }
        Some(Self {
            free_head: (buf[0x1d],buf[0x1e]),
            free_tail: (buf[0x1f],buf[0x20]),
            free_count: u16::from_be_bytes([buf[0x21],buf[0x22]]),
            max_track: buf[0x26] as usize,
            max_sector: buf[0x27] as usize
        })
    }
}

/// Allocation strategy over the linked free chain.
pub struct FlexAlloc {
    xlat: Translator,
    sec_size: usize
}

impl FlexAlloc {
    pub fn open(xlat: Translator) -> Self {
        Self {
            xlat,
            sec_size: 256
        }
    }
    pub fn xlat(&self) -> &Translator {
        &self.xlat
    }
    pub fn end_group(&self) -> u32 {
        self.xlat.positions() as u32
    }
    pub fn bytes_per_group(&self) -> usize {
        DATA_PER_SECTOR
    }
    pub fn data_skip(&self) -> usize {
        DATA_SKIP
    }
    fn secs_per_track(&self) -> usize {
        self.xlat.sectors(0) * self.xlat.side_count()
    }
    /// group from a 1-based (track, sector) pair, (0,0) is no link
    pub fn pair_to_group(&self,track: u8,sector: u8) -> Option<u32> {
        let spt = self.secs_per_track();
        if sector == 0 || sector as usize > spt || track as usize >= self.xlat.track_count() {
            return None;
        }
        Some((track as usize * spt + sector as usize - 1) as u32)
    }
    pub fn group_to_pair(&self,group: u32) -> (u8,u8) {
        let spt = self.secs_per_track();
        ((group as usize / spt) as u8,(group as usize % spt + 1) as u8)
    }
    pub fn group_ref(&self,group: u32) -> Result<GroupRef,DYNERR> {
        if group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        let (track,side,sec) = self.xlat.store_coords(group as usize)?;
        Ok(GroupRef::simple(group,track,side,sec))
    }
    fn sir_coords(&self) -> Result<(usize,usize,usize),DYNERR> {
        Ok(self.xlat.store_coords(SIR_SECTOR - 1)?)
    }
    fn read_sir(&self,store: &dyn SectorStore) -> Result<(Sir,Vec<u8>),DYNERR> {
        let (t,s,sec) = self.sir_coords()?;
        let buf = store.read_sector(t,s,sec)?;
        match Sir::from_sector(&buf) {
            Some(sir) => Ok((sir,buf)),
            None => Err(Box::new(Error::Structural))
        }
    }
    fn write_free_chain_fields(&self,store: &mut dyn SectorStore,head: (u8,u8),tail: (u8,u8),count: u16) -> STDRESULT {
        let (t,s,sec) = self.sir_coords()?;
        let mut patch = [0;6];
        patch[0] = head.0;
        patch[1] = head.1;
        patch[2] = tail.0;
        patch[3] = tail.1;
        patch[4..6].copy_from_slice(&u16::to_be_bytes(count));
        patch_sector(store,t,s,sec,0x1d,&patch)
    }
    /// Walk the free chain, bounded by the sector count.
    fn free_chain(&self,store: &dyn SectorStore) -> Result<Vec<u32>,DYNERR> {
        let (sir,_) = self.read_sir(store)?;
        let mut ans = Vec::new();
        let mut next = sir.free_head;
        for _rep in 0..self.end_group() {
            if next.0 == 0 && next.1 == 0 {
                return Ok(ans);
            }
            let g = match self.pair_to_group(next.0,next.1) {
                Some(g) => g,
                None => return Err(Box::new(Error::Structural))
            };
            ans.push(g);
            let r = self.group_ref(g)?;
            let buf = store.read_sector(r.track,r.side,r.sector_start)?;
            next = (buf[0],buf[1]);
        }
        Err(Box::new(Error::ChainLimit))
    }
    pub fn is_group_used(&self,store: &dyn SectorStore,group: u32) -> Result<bool,DYNERR> {
        if group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        Ok(!self.free_chain(store)?.contains(&group))
    }
    pub fn group_value(&self,store: &dyn SectorStore,group: u32) -> Result<u32,DYNERR> {
        Ok(match self.is_group_used(store,group)? {
            true => 1,
            false => 0
        })
    }
    /// The free chain is the only representation; single-sector state
    /// changes go through allocate and delete instead.
    pub fn set_group_value(&self,_store: &mut dyn SectorStore,_group: u32,_val: u32) -> STDRESULT {
        Err(Box::new(Error::Unsupported))
    }
    pub fn next_empty_group(&self,store: &dyn SectorStore,prev: Option<u32>) -> Result<Option<u32>,DYNERR> {
        let chain = self.free_chain(store)?;
        match prev {
            None => Ok(chain.first().copied()),
            Some(p) => match chain.iter().position(|g| *g==p) {
                Some(i) => Ok(chain.get(i+1).copied()),
                None => Ok(chain.first().copied())
            }
        }
    }
    /// Pop a run off the head of the free chain.  The run's internal
    /// links are already correct; only the terminal link, the record
    /// numbers, and the SIR fields need writing, so the no-space case is
    /// detected before anything is touched.
    pub fn allocate_groups(&self,store: &mut dyn SectorStore,size: usize,prev: Option<&GroupList>) -> Result<GroupList,DYNERR> {
        let bpg = self.bytes_per_group();
        let needed = match size {
            0 => 1,
            s => (s + bpg - 1) / bpg
        };
        let chain = self.free_chain(store)?;
        if chain.len() < needed {
            debug!("need {} sectors, free chain has {}",needed,chain.len());
            return Err(match prev.map(|p| p.count()).unwrap_or(0) {
                0 => Box::new(Error::NoSpaceBeforeStart),
                _ => Box::new(Error::NoSpaceAfterStart)
            });
        }
        let (sir,_) = self.read_sir(store)?;
        let taken = &chain[0..needed];
        let mut list = GroupList::new(bpg);
        let first_record = match prev {
            Some(p) => p.count() + 1,
            None => 1
        };
        for (i,g) in taken.iter().enumerate() {
            let r = self.group_ref(*g)?;
            list.push(r);
            patch_sector(store,r.track,r.side,r.sector_start,2,&u16::to_be_bytes((first_record+i) as u16))?;
        }
        // terminal link, then relink the old file tail for appends
        let last = list.last().unwrap();
        patch_sector(store,last.track,last.side,last.sector_start,0,&[0,0])?;
        if let Some(p) = prev {
            if let Some(old_last) = p.last() {
                let (t,s) = self.group_to_pair(taken[0]);
                patch_sector(store,old_last.track,old_last.side,old_last.sector_start,0,&[t,s])?;
            }
        }
        let new_head = match chain.get(needed) {
            Some(g) => self.group_to_pair(*g),
            None => (0,0)
        };
        let new_tail = match new_head {
            (0,0) => (0,0),
            _ => sir.free_tail
        };
        self.write_free_chain_fields(store,new_head,new_tail,sir.free_count - needed as u16)?;
        list.set_size(size);
        trace!("allocated {} sectors from the free chain",needed);
        Ok(list)
    }
    /// Re-thread the deleted sectors and append them to the free chain
    /// tail.
    pub fn delete_groups(&self,store: &mut dyn SectorStore,list: &GroupList) -> STDRESULT {
        if list.count() == 0 {
            return Ok(());
        }
        for i in 0..list.count() {
            let r = list.get(i).unwrap();
            let link = match list.get(i+1) {
                Some(next) => self.group_to_pair(next.group),
                None => (0,0)
            };
            patch_sector(store,r.track,r.side,r.sector_start,0,&[link.0,link.1,0,0])?;
        }
        let (sir,_) = self.read_sir(store)?;
        let head_pair = self.group_to_pair(list.first().unwrap().group);
        let tail_pair = self.group_to_pair(list.last().unwrap().group);
        match sir.free_head {
            (0,0) => self.write_free_chain_fields(store,head_pair,tail_pair,list.count() as u16),
            _ => {
                let g = match self.pair_to_group(sir.free_tail.0,sir.free_tail.1) {
                    Some(g) => g,
                    None => return Err(Box::new(Error::Structural))
                };
                let old_tail = self.group_ref(g)?;
                patch_sector(store,old_tail.track,old_tail.side,old_tail.sector_start,0,&[head_pair.0,head_pair.1])?;
                self.write_free_chain_fields(store,sir.free_head,tail_pair,sir.free_count + list.count() as u16)
            }
        }
    }
    pub fn disk_free_map(&self,store: &dyn SectorStore) -> Result<Vec<UnitState>,DYNERR> {
        let free = self.free_chain(store)?;
        let spt = self.secs_per_track();
        let mut ans = Vec::new();
        for g in 0..self.end_group() {
            ans.push(match (free.contains(&g),(g as usize) < spt) {
                (true,_) => UnitState::Free,
                (false,true) => UnitState::System,
                (false,false) => UnitState::Used
            });
        }
        Ok(ans)
    }
    /// Follow a file's chain from `start`.
    pub fn chain(&self,store: &dyn SectorStore,start: u32) -> Result<GroupList,DYNERR> {
        let mut list = GroupList::new(self.bytes_per_group());
        let mut g = start;
        for _rep in 0..self.end_group() {
            let r = self.group_ref(g)?;
            list.push(r);
            let buf = store.read_sector(r.track,r.side,r.sector_start)?;
            if buf[0] == 0 && buf[1] == 0 {
                list.set_size(list.capacity());
                return Ok(list);
            }
            g = match self.pair_to_group(buf[0],buf[1]) {
                Some(g) => g,
                None => {
                    debug!("chain ran off the disk at ({},{})",buf[0],buf[1]);
                    return Err(Box::new(Error::Structural));
                }
            };
        }
        Err(Box::new(Error::ChainLimit))
    }
    pub fn check_consistency(&self,store: &dyn SectorStore,formatting: bool) -> f64 {
        if formatting {
            return 0.0;
        }
        let (sir,buf) = match self.read_sir(store) {
            Ok(x) => x,
            Err(_) => return -1.0
        };
        if sir.max_track + 1 != self.xlat.track_count() || sir.max_sector != self.secs_per_track() {
            debug!("SIR declares {}x{}, image has {}x{}",sir.max_track+1,sir.max_sector,
                self.xlat.track_count(),self.secs_per_track());
            return -1.0;
        }
        if sir.free_count as usize > self.xlat.positions() {
            return -1.0;
        }
        if sir.free_head != (0,0) && self.pair_to_group(sir.free_head.0,sir.free_head.1).is_none() {
            return -1.0;
        }
        let mut score = 0.5;
        if super::printable_fraction(&buf[0x10..0x1b]) > 0.5 {
            score += 0.25;
        }
        // month field of the creation date
        if buf[0x23] >= 1 && buf[0x23] <= 12 {
            score += 0.25;
        }
        score
    }
    pub fn parse_geometry(&mut self,store: &dyn SectorStore,formatting: bool) -> f64 {
        if formatting {
            return 1.0;
        }
        let (sir,_) = match self.read_sir(store) {
            Ok(x) => x,
            Err(_) => return -1.0
        };
        if sir.max_track + 1 > self.xlat.track_count() {
            debug!("SIR geometry disagrees with the image");
            return -1.0;
        }
        1.0
    }
    /// Directory chain on track 0, starting at sector 5.
    pub fn root_groups(&self,store: &dyn SectorStore) -> Result<GroupList,DYNERR> {
        let mut list = GroupList::new(self.sec_size);
        let mut next = (0u8,FIRST_DIR_SECTOR as u8);
        for _rep in 0..self.end_group() {
            let g = match (next.0,next.1) {
                (0,0) => {
                    list.set_size(list.capacity());
                    return Ok(list);
                },
                (t,s) => match self.pair_to_group(t,s) {
                    Some(g) => g,
                    None => return Err(Box::new(Error::Structural))
                }
            };
            list.push(self.group_ref(g)?);
            let r = list.last().unwrap();
            let buf = store.read_sector(r.track,r.side,r.sector_start)?;
            next = (buf[0],buf[1]);
        }
        Err(Box::new(Error::ChainLimit))
    }
    /// Grow the directory chain by one sector from the free chain head.
    pub fn expand_root(&self,store: &mut dyn SectorStore) -> Result<Option<GroupRef>,DYNERR> {
        let taken = match self.allocate_groups(store,1,None) {
            Ok(list) => *list.first().unwrap(),
            Err(_) => return Ok(None)
        };
        let mut fresh = vec![0;self.sec_size];
        fresh[3] = 0;
        store.write_sector(taken.track,taken.side,taken.sector_start,&fresh)?;
        let tail = self.root_groups(store)?;
        let (t,s) = self.group_to_pair(taken.group);
        match tail.last() {
            Some(old) => patch_sector(store,old.track,old.side,old.sector_start,0,&[t,s])?,
            None => return Err(Box::new(Error::Structural))
        };
        Ok(Some(taken))
    }
    pub fn volume_name(&self,store: &dyn SectorStore) -> Result<String,DYNERR> {
        let (_,raw) = self.read_sir(store)?;
        Ok(super::unpack_name(&raw[0x10..0x1b],0x00))
    }
    pub fn set_volume_name(&self,store: &mut dyn SectorStore,name: &str) -> STDRESULT {
        if name.is_empty() || name.len() > 11 || !name.is_ascii() {
            return Err(Box::new(Error::BadName));
        }
        let (_,mut raw) = self.read_sir(store)?;
        raw[0x10..0x1b].copy_from_slice(&super::pack_name(&name.to_uppercase(),11,0x00));
        let (t,s,sec) = self.sir_coords()?;
        store.write_sector(t,s,sec,&raw)
    }
    pub fn format_disk(&self,store: &mut dyn SectorStore,name: &str,vol: u16) -> STDRESULT {
        let spt = self.secs_per_track();
        let tracks = self.xlat.track_count();
        // free chain covers every sector outside track 0, in ascending order
        for t in 1..tracks {
            for s in 1..=spt {
                let g = self.pair_to_group(t as u8,s as u8).unwrap();
                let r = self.group_ref(g)?;
                let mut buf = vec![0;self.sec_size];
                if s < spt {
                    buf[0] = t as u8;
                    buf[1] = (s+1) as u8;
                } else if t+1 < tracks {
                    buf[0] = (t+1) as u8;
                    buf[1] = 1;
                }
                store.write_sector(r.track,r.side,r.sector_start,&buf)?;
            }
        }
        // directory sectors chained through the rest of track 0
        for s in FIRST_DIR_SECTOR..=spt {
            let mut buf = vec![0;self.sec_size];
            if s < spt {
                buf[0] = 0;
                buf[1] = (s+1) as u8;
            }
            let r = self.group_ref(self.pair_to_group(0,s as u8).unwrap())?;
            store.write_sector(r.track,r.side,r.sector_start,&buf)?;
        }
        let mut sir = vec![0;self.sec_size];
        sir[0x10..0x1b].copy_from_slice(&super::pack_name(&name.to_uppercase(),11,0x00));
        sir[0x1b..0x1d].copy_from_slice(&u16::to_be_bytes(vol));
        sir[0x1d] = 1;
        sir[0x1e] = 1;
        sir[0x1f] = (tracks-1) as u8;
        sir[0x20] = spt as u8;
        let free = ((tracks-1)*spt) as u16;
        sir[0x21..0x23].copy_from_slice(&u16::to_be_bytes(free));
        let now = chrono::Local::now().naive_local().date();
        sir[0x23] = now.month() as u8;
        sir[0x24] = now.day() as u8;
        sir[0x25] = (now.year() % 100) as u8;
        sir[0x26] = (tracks-1) as u8;
        sir[0x27] = spt as u8;
        let (t,s,sec) = self.sir_coords()?;
        store.write_sector(t,s,sec,&sir)
    }
}

/// Directory entry codec: 24 byte records, 8+3 name, protection bits,
/// start and end pairs, big-endian sector count, random-access flag, and
/// a month/day/year date.
/// protection byte and sequential/random flag derived from the common mask
fn attr_bits(common: u16) -> (u8,u8) {
    let mut prot = 0;
    if common & super::READ_ONLY > 0 {
        prot |= WRITE_PROTECT | DELETE_PROTECT;
    }
    if common & super::HIDDEN > 0 {
        prot |= CATALOG_PROTECT;
    }
    let sif = match common & super::RANDOM > 0 {
        true => 2,
        false => 0
    };
    (prot,sif)
}

pub struct FlexEntries {
}

impl FlexEntries {
    pub fn new() -> Self {
        Self {}
    }
    pub fn layout(&self) -> DirLayout {
        DirLayout::Flat {entry_len: ENTRY_LEN, sector_skip: DIR_SKIP, root_skip: 0}
    }
    pub fn check(&self,raw: &[u8],_last: &mut bool) -> bool {
        if raw.len() < ENTRY_LEN {
            return false;
        }
        if raw[0] == 0x00 || raw[0] == DELETED {
            return true;
        }
        if raw[11] & 0x0f != 0 {
            return false;
        }
        // month sanity when a date is present
        if raw[21] > 12 || raw[22] > 31 {
            return false;
        }
        true
    }
    pub fn check_used(&self,raw: &[u8],_unuse_hint: bool) -> bool {
        raw[0] != 0x00 && raw[0] != DELETED
    }
    pub fn name(&self,raw: &[u8]) -> String {
        let base = super::unpack_name(&raw[0..8],0x00);
        let ext = super::unpack_name(&raw[8..11],0x00);
        match ext.len() {
            0 => base,
            _ => [base,".".to_string(),ext].concat()
        }
    }
    pub fn name_bytes<'a>(&self,raw: &'a [u8]) -> &'a [u8] {
        &raw[0..11]
    }
    pub fn get_attr(&self,raw: &[u8]) -> FileAttr {
        let native = raw[11];
        let mut common = super::BINARY;
        if raw[19] > 0 {
            common |= super::RANDOM;
        }
        if native & (WRITE_PROTECT | DELETE_PROTECT) > 0 {
            common |= super::READ_ONLY;
        }
        if native & CATALOG_PROTECT > 0 {
            common |= super::HIDDEN;
        }
        FileAttr {
            format: FormatKind::Flex,
            common,
            origin: [native as u32,raw[19] as u32,0]
        }
    }
    pub fn set_attr(&self,raw: &mut [u8],attr: &FileAttr) {
        if attr.format == FormatKind::Flex {
            raw[11] = attr.origin[0] as u8;
            raw[19] = attr.origin[1] as u8;
            return;
        }
        let (prot,sif) = attr_bits(attr.common);
        raw[11] = prot;
        raw[19] = sif;
    }
    pub fn start_group_pair(&self,raw: &[u8]) -> Option<(u8,u8)> {
        match self.check_used(raw,false) {
            true => Some((raw[13],raw[14])),
            false => None
        }
    }
    pub fn set_start(&self,raw: &mut [u8],alloc: &FlexAlloc,list: &GroupList) -> STDRESULT {
        if let Some(first) = list.first() {
            let (t,s) = alloc.group_to_pair(first.group);
            raw[13] = t;
            raw[14] = s;
        }
        if let Some(last) = list.last() {
            let (t,s) = alloc.group_to_pair(last.group);
            raw[15] = t;
            raw[16] = s;
        }
        raw[17..19].copy_from_slice(&u16::to_be_bytes(list.count() as u16));
        Ok(())
    }
    pub fn groups(&self,store: &dyn SectorStore,alloc: &FlexAlloc,raw: &[u8]) -> Result<GroupList,DYNERR> {
        match self.start_group_pair(raw) {
            Some((0,0)) | None => Ok(GroupList::new(alloc.bytes_per_group())),
            Some((t,s)) => match alloc.pair_to_group(t,s) {
                Some(g) => alloc.chain(store,g),
                None => Err(Box::new(Error::Structural))
            }
        }
    }
    /// No byte count on disk; sequential files are trimmed at the
    /// trailing zero fill of the last sector.
    pub fn file_size(&self,store: &dyn SectorStore,alloc: &FlexAlloc,raw: &[u8],list: &GroupList) -> usize {
        let capacity = list.capacity();
        if raw[19] > 0 || capacity == 0 {
            return capacity;
        }
        if let Some(last) = list.last() {
            if let Ok(buf) = store.read_sector(last.track,last.side,last.sector_start) {
                let data = &buf[alloc.data_skip()..];
                let used = match data.iter().rposition(|b| *b != 0) {
                    Some(i) => i+1,
                    None => 0
                };
                return capacity - alloc.bytes_per_group() + used;
            }
        }
        capacity
    }
    pub fn create(&self,attr: &DirItemAttr,_start: u32) -> Result<Vec<u8>,DYNERR> {
        let (base,ext) = match attr.name.split_once('.') {
            Some((b,x)) => (b.to_string(),x.to_string()),
            None => (attr.name.clone(),String::new())
        };
        if base.is_empty() || base.len() > 8 || ext.len() > 3 || !base.is_ascii() {
            return Err(Box::new(Error::BadName));
        }
        let mut raw = vec![0;ENTRY_LEN];
        raw[0..8].copy_from_slice(&super::pack_name(&base.to_uppercase(),8,0x00));
        raw[8..11].copy_from_slice(&super::pack_name(&ext.to_uppercase(),3,0x00));
        if !attr.ignore_type {
            let (prot,sif) = attr_bits(attr.common);
            raw[11] = match attr.native_type {
                Some(t) => t as u8,
                None => prot
            };
            raw[19] = sif;
        }
        if !attr.ignore_date {
            let date = match attr.datetime {
                Some(dt) => dt.date(),
                None => chrono::Local::now().naive_local().date()
            };
            raw[21] = date.month() as u8;
            raw[22] = date.day() as u8;
            raw[23] = (date.year() % 100) as u8;
        }
        Ok(raw)
    }
    pub fn rename(&self,raw: &mut [u8],name: &str) -> STDRESULT {
        let probe = self.create(&DirItemAttr {name: name.to_string(), ignore_date: true, ..Default::default()},0)?;
        raw[0..11].copy_from_slice(&probe[0..11]);
        Ok(())
    }
    pub fn tombstone(&self,raw: &mut [u8]) {
        raw[0] = DELETED;
    }
    pub fn has_date(&self) -> bool {
        true
    }
    pub fn get_date(&self,raw: &[u8]) -> Option<chrono::NaiveDateTime> {
        if raw[21] == 0 {
            return None;
        }
        let year = match raw[23] {
            y if y < 75 => 2000 + y as i32,
            y => 1900 + y as i32
        };
        Some(chrono::NaiveDate::from_ymd_opt(year,raw[21] as u32,raw[22] as u32)?
            .and_hms_opt(0,0,0)?)
    }
    pub fn set_date(&self,raw: &mut [u8],dt: chrono::NaiveDateTime) {
        raw[21] = dt.date().month() as u8;
        raw[22] = dt.date().day() as u8;
        raw[23] = (dt.date().year() % 100) as u8;
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

    fn setup() -> (crate::store::MemStore,FlexAlloc) {
        let t = templates::template(FormatKind::Flex);
        let mut store = t.blank_store();
        let alloc = FlexAlloc::open(t.translator().expect("bad translator"));
        alloc.format_disk(&mut store,"TESTDISK",1).expect("format failed");
        (store,alloc)
    }
    #[test]
    fn fresh_chain_is_ascending() {
        let (store,alloc) = setup();
        let chain = alloc.free_chain(&store).expect("bad chain");
        assert_eq!(chain.len(),34*10);
        assert_eq!(alloc.group_to_pair(chain[0]),(1,1));
        assert_eq!(alloc.group_to_pair(chain[10]),(2,1));
        assert_eq!(alloc.group_to_pair(*chain.last().unwrap()),(34,10));
    }
    #[test]
    fn allocate_pops_head_and_numbers_records() {
        let (mut store,alloc) = setup();
        let list = alloc.allocate_groups(&mut store,700,None).expect("allocation failed");
        assert_eq!(list.count(),3); // 700 = 2*252 + 196
        assert_eq!(alloc.group_to_pair(list.first().unwrap().group),(1,1));
        let second = list.get(1).unwrap();
        let buf = store.read_sector(second.track,second.side,second.sector_start).expect("io");
        assert_eq!(u16::from_be_bytes([buf[2],buf[3]]),2);
        let (sir,_) = alloc.read_sir(&store).expect("bad sir");
        assert_eq!(sir.free_head,(1,4));
        assert_eq!(sir.free_count,34*10-3);
    }
    #[test]
    fn delete_appends_to_tail() {
        let (mut store,alloc) = setup();
        let list = alloc.allocate_groups(&mut store,500,None).expect("allocation failed");
        alloc.delete_groups(&mut store,&list).expect("delete failed");
        let chain = alloc.free_chain(&store).expect("bad chain");
        assert_eq!(chain.len(),34*10);
        // the freed sectors come back at the end, not the front
        assert_eq!(alloc.group_to_pair(chain[0]),(1,3));
        assert_eq!(alloc.group_to_pair(*chain.last().unwrap()),(1,2));
        let (sir,_) = alloc.read_sir(&store).expect("bad sir");
        assert_eq!(sir.free_tail,(1,2));
    }
    #[test]
    fn entry_date_round_trip() {
        let codec = FlexEntries::new();
        let dt = chrono::NaiveDate::from_ymd_opt(1982,3,9).unwrap().and_hms_opt(0,0,0).unwrap();
        let attr = DirItemAttr {
            name: "REPORT.TXT".to_string(),
            datetime: Some(dt),
            ..Default::default()
        };
        let raw = codec.create(&attr,0).expect("bad entry");
        assert_eq!(codec.name(&raw),"REPORT.TXT");
        assert_eq!(codec.get_date(&raw),Some(dt));
    }
}
