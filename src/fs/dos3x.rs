//! ### Apple DOS 3.x file system
//!
//! The VTOC on track 17 holds the free-sector bitmap (4 bytes per track)
//! and points at the catalog chain, which normally runs from sector 15
//! down to sector 1 on the same track.  A file's storage is indexed by a
//! chain of track/sector list sectors, each holding up to 122 data sector
//! pairs; the directory entry points at the first list sector.
//!
//! The allocation unit is one 256 byte sector.  The free search moves
//! outward from the VTOC track, taking sectors within a track in
//! descending order, the same order the real DOS produces on a freshly
//! formatted disk.

use log::{trace,debug};
use crate::store::{SectorStore,patch_sector};
use crate::chs::Translator;
use crate::{DYNERR,STDRESULT};
use super::{Error,FormatKind,FileAttr,GroupRef,GroupList,UnitState,DirItemAttr,DirLayout};

pub const VTOC_TRACK: usize = 17;
pub const VTOC_SECTOR: usize = 0;
pub const ENTRY_LEN: usize = 35;
/// first entry offset within a catalog sector
pub const CAT_SKIP: usize = 0x0b;
pub const MAX_PAIRS: usize = 122;
/// first data pair offset within a track/sector list sector
pub const PAIR_SKIP: usize = 0x0c;
pub const NAME_LEN: usize = 30;
/// tracks the system image occupies on a boot disk
pub const BOOT_TRACKS: usize = 3;

// type byte values, bit 7 is the lock flag
pub const TYPE_TEXT: u8 = 0x00;
pub const TYPE_INTEGER: u8 = 0x01;
pub const TYPE_APPLESOFT: u8 = 0x02;
pub const TYPE_BINARY: u8 = 0x04;
pub const LOCKED: u8 = 0x80;
const VALID_TYPES: [u8;8] = [0x00,0x01,0x02,0x04,0x08,0x10,0x20,0x40];

const DELETED: u8 = 0xff;

/// VTOC fields the allocator works from
#[derive(Clone,Copy)]
struct Vtoc {
    cat_track: usize,
    cat_sector: usize,
    vol: u8,
    tracks: usize,
    sectors: usize,
    last_track: usize,
    /// +1 moving away from the hub, -1 toward it
    direction: i8
}

impl Vtoc {
    fn from_sector(buf: &[u8]) -> Option<Self> {
        if buf.len() < 0x38 {
            return None;
        }
        Some(Self {
            cat_track: buf[1] as usize,
            cat_sector: buf[2] as usize,
            vol: buf[6],
            tracks: buf[0x34] as usize,
            sectors: buf[0x35] as usize,
            last_track: buf[0x30] as usize,
            direction: buf[0x31] as i8
        })
    }
}

/// byte offset and mask of a track/sector bit within the VTOC
fn bitmap_coords(track: usize,sector: usize) -> (usize,u8) {
    match sector {
        s if s >= 8 => (0x38 + track*4,1 << (s-8)),
        s => (0x38 + track*4 + 1,1 << s)
    }
}

/// Allocation strategy over the VTOC bitmap.
pub struct Dos3xAlloc {
    xlat: Translator,
    sec_size: usize,
    vtoc_track: usize,
    tracks: usize,
    sectors: usize,
    cat_track: usize,
    cat_sector: usize
}

impl Dos3xAlloc {
    pub fn open(xlat: Translator) -> Self {
        let tracks = xlat.track_count();
        let sectors = xlat.sectors(0);
        Self {
            xlat,
            sec_size: 256,
            vtoc_track: VTOC_TRACK,
            tracks,
            sectors,
            cat_track: VTOC_TRACK,
            cat_sector: 15
        }
    }
    pub fn xlat(&self) -> &Translator {
        &self.xlat
    }
    pub fn end_group(&self) -> u32 {
        (self.tracks * self.sectors) as u32
    }
    pub fn bytes_per_group(&self) -> usize {
        self.sec_size
    }
    fn read_vtoc(&self,store: &dyn SectorStore) -> Result<Vec<u8>,DYNERR> {
        let (t,s,sec) = self.xlat.store_coords(self.vtoc_track*self.sectors + VTOC_SECTOR)?;
        store.read_sector(t,s,sec)
    }
    fn patch_vtoc(&self,store: &mut dyn SectorStore,offset: usize,patch: &[u8]) -> STDRESULT {
        let (t,s,sec) = self.xlat.store_coords(self.vtoc_track*self.sectors + VTOC_SECTOR)?;
        patch_sector(store,t,s,sec,offset,patch)
    }
    pub fn group_ref(&self,group: u32) -> Result<GroupRef,DYNERR> {
        if group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        let (track,side,sec) = self.xlat.store_coords(group as usize)?;
        Ok(GroupRef::simple(group,track,side,sec))
    }
    /// group number from a DOS (track, sector) address pair
    pub fn pair_to_group(&self,track: u8,sector: u8) -> Option<u32> {
        let g = track as usize * self.sectors + sector as usize;
        match (track as usize) < self.tracks && (sector as usize) < self.sectors {
            true => Some(g as u32),
            false => None
        }
    }
    pub fn group_to_pair(&self,group: u32) -> (u8,u8) {
        ((group as usize / self.sectors) as u8,(group as usize % self.sectors) as u8)
    }
    pub fn group_value(&self,store: &dyn SectorStore,group: u32) -> Result<u32,DYNERR> {
        Ok(match self.is_group_used(store,group)? {
            true => 1,
            false => 0
        })
    }
    pub fn set_group_value(&self,store: &mut dyn SectorStore,group: u32,val: u32) -> STDRESULT {
        if group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        let (track,sector) = self.group_to_pair(group);
        let (offset,mask) = bitmap_coords(track as usize,sector as usize);
        let vtoc = self.read_vtoc(store)?;
        let byte = match val {
            0 => vtoc[offset] | mask,
            _ => vtoc[offset] & !mask
        };
        self.patch_vtoc(store,offset,&[byte])
    }
    pub fn is_group_used(&self,store: &dyn SectorStore,group: u32) -> Result<bool,DYNERR> {
        if group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        let (track,sector) = self.group_to_pair(group);
        let (offset,mask) = bitmap_coords(track as usize,sector as usize);
        let vtoc = self.read_vtoc(store)?;
        // a set bit means free
        Ok(vtoc[offset] & mask == 0)
    }
    /// Track order moving outward from the VTOC track, hub side first.
    fn track_order(&self) -> Vec<usize> {
        let mut ans = Vec::new();
        for d in 1..self.tracks {
            if self.vtoc_track >= d && self.vtoc_track - d >= BOOT_TRACKS {
                ans.push(self.vtoc_track - d);
            }
            if self.vtoc_track + d < self.tracks {
                ans.push(self.vtoc_track + d);
            }
        }
        ans
    }
    fn search_order(&self) -> Vec<u32> {
        let mut ans = Vec::new();
        for t in self.track_order() {
            for s in (0..self.sectors).rev() {
                ans.push((t*self.sectors + s) as u32);
            }
        }
        ans
    }
    pub fn next_empty_group(&self,store: &dyn SectorStore,prev: Option<u32>) -> Result<Option<u32>,DYNERR> {
        let vtoc = self.read_vtoc(store)?;
        let order = self.search_order();
        let start = match prev {
            Some(p) => match order.iter().position(|g| *g==p) {
                Some(i) => i+1,
                None => 0
            },
            None => 0
        };
        for g in &order[start..] {
            let (track,sector) = self.group_to_pair(*g);
            let (offset,mask) = bitmap_coords(track as usize,sector as usize);
            if vtoc[offset] & mask > 0 {
                return Ok(Some(*g));
            }
        }
        Ok(None)
    }
    /// Reserve sectors for `size` bytes of data.  Chain pointers live in
    /// the track/sector list, which the entry codec builds separately, so
    /// a failure here only needs the bitmap bits rolled back.
    pub fn allocate_groups(&self,store: &mut dyn SectorStore,size: usize,prev: Option<&GroupList>) -> Result<GroupList,DYNERR> {
        let needed = (size + self.sec_size - 1) / self.sec_size;
        let mut list = GroupList::new(self.sec_size);
        let mut written: Vec<u32> = Vec::new();
        let mut last: Option<u32> = None;
        let appending = match prev {
            Some(p) => p.count() > 0,
            None => false
        };
        for i in 0..needed {
            let g = match self.next_empty_group(store,last)? {
                Some(g) => g,
                None => {
                    for w in &written {
                        self.set_group_value(store,*w,0)?;
                    }
                    debug!("no space for sector {} of {}",i+1,needed);
                    return Err(match written.is_empty() && !appending {
                        true => Box::new(Error::NoSpaceBeforeStart),
                        false => Box::new(Error::NoSpaceAfterStart)
                    });
                }
            };
            self.set_group_value(store,g,1)?;
            written.push(g);
            list.push(self.group_ref(g)?);
            last = Some(g);
        }
        // record the last touched track for the benefit of real DOS
        if let Some(g) = last {
            let (track,_) = self.group_to_pair(g);
            let dir: u8 = match (track as usize) < self.vtoc_track {
                true => 0xff,
                false => 1
            };
            self.patch_vtoc(store,0x30,&[track,dir])?;
        }
        list.set_size(size);
        trace!("allocated {} sectors",list.count());
        Ok(list)
    }
    pub fn delete_groups(&self,store: &mut dyn SectorStore,list: &GroupList) -> STDRESULT {
        for g in list.iter() {
            self.set_group_value(store,g.group,0)?;
        }
        Ok(())
    }
    pub fn disk_free_map(&self,store: &dyn SectorStore) -> Result<Vec<UnitState>,DYNERR> {
        let vtoc = self.read_vtoc(store)?;
        let mut ans = Vec::new();
        for g in 0..self.end_group() {
            let (track,sector) = self.group_to_pair(g);
            let (offset,mask) = bitmap_coords(track as usize,sector as usize);
            let t = track as usize;
            ans.push(match (vtoc[offset] & mask > 0,t < BOOT_TRACKS || t == self.vtoc_track) {
                (true,_) => UnitState::Free,
                (false,true) => UnitState::System,
                (false,false) => UnitState::Used
            });
        }
        Ok(ans)
    }
    pub fn check_consistency(&self,store: &dyn SectorStore,formatting: bool) -> f64 {
        if formatting {
            return 0.0;
        }
        let buf = match self.read_vtoc(store) {
            Ok(b) => b,
            Err(_) => return -1.0
        };
        let vtoc = match Vtoc::from_sector(&buf) {
            Some(v) => v,
            None => return -1.0
        };
        if vtoc.tracks != self.tracks || vtoc.sectors != self.sectors {
            debug!("VTOC declares {}x{}, expected {}x{}",vtoc.tracks,vtoc.sectors,self.tracks,self.sectors);
            return -1.0;
        }
        if vtoc.cat_track >= self.tracks || vtoc.cat_sector >= self.sectors {
            return -1.0;
        }
        if vtoc.direction != 1 && vtoc.direction != -1 {
            return -1.0;
        }
        let mut score = 0.5;
        // the VTOC's own sector must not read as free
        let (offset,mask) = bitmap_coords(self.vtoc_track,VTOC_SECTOR);
        if buf[offset] & mask == 0 {
            score += 0.25;
        }
        if u16::from_le_bytes([buf[0x36],buf[0x37]]) == self.sec_size as u16 {
            score += 0.25;
        }
        score
    }
    pub fn parse_geometry(&mut self,store: &dyn SectorStore,formatting: bool) -> f64 {
        if formatting {
            return 1.0;
        }
        let buf = match self.read_vtoc(store) {
            Ok(b) => b,
            Err(_) => return -1.0
        };
        let vtoc = match Vtoc::from_sector(&buf) {
            Some(v) => v,
            None => return -1.0
        };
        if vtoc.tracks > self.xlat.track_count() || vtoc.sectors != self.xlat.sectors(0) {
            debug!("VTOC geometry disagrees with the image");
            return -1.0;
        }
        self.tracks = vtoc.tracks;
        self.sectors = vtoc.sectors;
        self.cat_track = vtoc.cat_track;
        self.cat_sector = vtoc.cat_sector;
        1.0
    }
    /// Walk the catalog chain from the VTOC.  Bounded by the sector count
    /// so a looped chain terminates as a structural error.
    pub fn root_groups(&self,store: &dyn SectorStore) -> Result<GroupList,DYNERR> {
        let mut list = GroupList::new(self.sec_size);
        let mut track = self.cat_track;
        let mut sector = self.cat_sector;
        for _rep in 0..self.end_group() {
            if track == 0 {
                list.set_size(list.capacity());
                return Ok(list);
            }
            if track >= self.tracks || sector >= self.sectors {
                return Err(Box::new(Error::Structural));
            }
            let g = (track*self.sectors + sector) as u32;
            list.push(self.group_ref(g)?);
            let r = list.last().unwrap();
            let buf = store.read_sector(r.track,r.side,r.sector_start)?;
            track = buf[1] as usize;
            sector = buf[2] as usize;
        }
        Err(Box::new(Error::ChainLimit))
    }
    /// Lay down the VTOC and an empty catalog chain, reserving the boot
    /// tracks and the VTOC track.
    pub fn format_disk(&self,store: &mut dyn SectorStore,vol: u8) -> STDRESULT {
        let mut vtoc = vec![0;self.sec_size];
        vtoc[1] = self.vtoc_track as u8;
        vtoc[2] = (self.sectors-1) as u8;
        vtoc[3] = 3; // DOS version
        vtoc[6] = vol;
        vtoc[0x27] = MAX_PAIRS as u8;
        vtoc[0x30] = (self.vtoc_track-1) as u8;
        vtoc[0x31] = 0xff;
        vtoc[0x34] = self.tracks as u8;
        vtoc[0x35] = self.sectors as u8;
        vtoc[0x36..0x38].copy_from_slice(&u16::to_le_bytes(self.sec_size as u16));
        for t in 0..self.tracks {
            if t < BOOT_TRACKS || t == self.vtoc_track {
                continue;
            }
            for s in 0..self.sectors {
                let (offset,mask) = bitmap_coords(t,s);
                vtoc[offset] |= mask;
            }
        }
        let (t,s,sec) = self.xlat.store_coords(self.vtoc_track*self.sectors + VTOC_SECTOR)?;
        store.write_sector(t,s,sec,&vtoc)?;
        // catalog runs from the top sector down to 1
        for cat_sec in 1..self.sectors {
            let mut buf = vec![0;self.sec_size];
            if cat_sec > 1 {
                buf[1] = self.vtoc_track as u8;
                buf[2] = (cat_sec-1) as u8;
            }
            let (t,s,sec) = self.xlat.store_coords(self.vtoc_track*self.sectors + cat_sec)?;
            store.write_sector(t,s,sec,&buf)?;
        }
        Ok(())
    }
}

/// Directory entry codec: 35 byte catalog records with a pointer to the
/// first track/sector list, a type byte, a high-ASCII name, and a length
/// in sectors.
/// native type byte derived from the common mask
fn attr_bits(common: u16) -> u8 {
    let mut native = match (common & super::TOKENIZED > 0,common & super::ASCII > 0) {
        (true,_) => TYPE_APPLESOFT,
        (false,true) => TYPE_TEXT,
        _ => TYPE_BINARY
    };
    if common & super::READ_ONLY > 0 {
        native |= LOCKED;
    }
    native
}

pub struct Dos3xEntries {
}

impl Dos3xEntries {
    pub fn new() -> Self {
        Self {}
    }
    pub fn layout(&self) -> DirLayout {
        DirLayout::Flat {entry_len: ENTRY_LEN, sector_skip: CAT_SKIP, root_skip: 0}
    }
    pub fn check(&self,raw: &[u8],_last: &mut bool) -> bool {
        if raw.len() < ENTRY_LEN {
            return false;
        }
        if raw[0] == 0x00 || raw[0] == DELETED {
            return true;
        }
        if !VALID_TYPES.contains(&(raw[2] & 0x7f)) {
            return false;
        }
        // live names are high ASCII
        for b in &raw[3..3+NAME_LEN] {
            if *b < 0x80 {
                return false;
            }
        }
        true
    }
    pub fn check_used(&self,raw: &[u8],_unuse_hint: bool) -> bool {
        raw[0] != 0x00 && raw[0] != DELETED
    }
    pub fn name(&self,raw: &[u8]) -> String {
        let mut ans = String::new();
        for b in &raw[3..3+NAME_LEN] {
            let low = b & 0x7f;
            ans.push(match low {
                x if x >= 0x20 && x < 0x7f => x as char,
                _ => '?'
            });
        }
        ans.trim_end().to_string()
    }
    pub fn name_bytes<'a>(&self,raw: &'a [u8]) -> &'a [u8] {
        &raw[3..3+NAME_LEN]
    }
    pub fn get_attr(&self,raw: &[u8]) -> FileAttr {
        let native = raw[2];
        let mut common = match native & 0x7f {
            TYPE_TEXT => super::ASCII,
            TYPE_INTEGER | TYPE_APPLESOFT => super::TOKENIZED,
            TYPE_BINARY => super::BINARY | super::MACHINE,
            _ => super::BINARY
        };
        if native & LOCKED > 0 {
            common |= super::READ_ONLY;
        }
        FileAttr {
            format: FormatKind::AppleDos,
            common,
            origin: [native as u32,0,0]
        }
    }
    pub fn set_attr(&self,raw: &mut [u8],attr: &FileAttr) {
        if attr.format == FormatKind::AppleDos {
            raw[2] = attr.origin[0] as u8;
            return;
        }
        raw[2] = attr_bits(attr.common);
    }
    /// group of the first track/sector list sector
    pub fn start_group(&self,raw: &[u8]) -> Option<u32> {
        match self.check_used(raw,false) {
            true => Some(raw[0] as u32 * 16 + raw[1] as u32),
            false => None
        }
    }
    /// Data sectors, resolved by chasing the track/sector list chain.
    /// A (0,0) pair ends the data.
    pub fn groups(&self,store: &dyn SectorStore,alloc: &Dos3xAlloc,raw: &[u8]) -> Result<GroupList,DYNERR> {
        let mut list = GroupList::new(alloc.bytes_per_group());
        for tsl in self.index_groups(store,alloc,raw)?.iter() {
            let buf = store.read_sector(tsl.track,tsl.side,tsl.sector_start)?;
            for pair in 0..MAX_PAIRS {
                let (t,s) = (buf[PAIR_SKIP + 2*pair],buf[PAIR_SKIP + 2*pair + 1]);
                if t == 0 && s == 0 {
                    list.set_size(list.capacity());
                    return Ok(list);
                }
                match alloc.pair_to_group(t,s) {
                    Some(g) => list.push(alloc.group_ref(g)?),
                    None => return Err(Box::new(Error::Structural))
                };
            }
        }
        list.set_size(list.capacity());
        Ok(list)
    }
    /// The track/sector list sectors themselves.
    pub fn index_groups(&self,store: &dyn SectorStore,alloc: &Dos3xAlloc,raw: &[u8]) -> Result<GroupList,DYNERR> {
        let mut list = GroupList::new(alloc.bytes_per_group());
        let mut next = match self.check_used(raw,false) {
            true => (raw[0],raw[1]),
            false => return Ok(list)
        };
        for _rep in 0..alloc.end_group() {
            if next.0 == 0 && next.1 == 0 {
                list.set_size(list.capacity());
                return Ok(list);
            }
            let g = match alloc.pair_to_group(next.0,next.1) {
                Some(g) => g,
                None => return Err(Box::new(Error::Structural))
            };
            list.push(alloc.group_ref(g)?);
            let r = list.last().unwrap();
            let buf = store.read_sector(r.track,r.side,r.sector_start)?;
            next = (buf[1],buf[2]);
        }
        Err(Box::new(Error::ChainLimit))
    }
    /// Build the track/sector list chain for `data`, allocating list
    /// sectors from the bitmap.  Returns the list sectors; the first one
    /// is what the directory entry must point at.
    pub fn write_index(&self,store: &mut dyn SectorStore,alloc: &Dos3xAlloc,data: &GroupList) -> Result<GroupList,DYNERR> {
        let count = usize::max(1,(data.count() + MAX_PAIRS - 1) / MAX_PAIRS);
        let mut tsl = GroupList::new(alloc.bytes_per_group());
        for _i in 0..count {
            let g = match alloc.next_empty_group(store,tsl.last().map(|r| r.group))? {
                Some(g) => g,
                None => {
                    for r in tsl.iter() {
                        alloc.set_group_value(store,r.group,0)?;
                    }
                    return Err(Box::new(Error::NoSpaceAfterStart));
                }
            };
            alloc.set_group_value(store,g,1)?;
            tsl.push(alloc.group_ref(g)?);
        }
        for i in 0..count {
            let mut buf = vec![0;alloc.bytes_per_group()];
            if i+1 < count {
                let (t,s) = alloc.group_to_pair(tsl.get(i+1).unwrap().group);
                buf[1] = t;
                buf[2] = s;
            }
            buf[5..7].copy_from_slice(&u16::to_le_bytes((i*MAX_PAIRS) as u16));
            for pair in 0..MAX_PAIRS {
                match data.get(i*MAX_PAIRS + pair) {
                    Some(r) => {
                        let (t,s) = alloc.group_to_pair(r.group);
                        buf[PAIR_SKIP + 2*pair] = t;
                        buf[PAIR_SKIP + 2*pair + 1] = s;
                    },
                    None => break
                };
            }
            let r = tsl.get(i).unwrap();
            store.write_sector(r.track,r.side,r.sector_start,&buf)?;
        }
        tsl.set_size(tsl.capacity());
        Ok(tsl)
    }
    /// point the entry at its first list sector and record the total
    /// sector count, data plus list
    pub fn set_index(&self,raw: &mut [u8],alloc: &Dos3xAlloc,tsl: &GroupList,data_count: usize) {
        if let Some(first) = tsl.first() {
            let (t,s) = alloc.group_to_pair(first.group);
            raw[0] = t;
            raw[1] = s;
        }
        let total = (data_count + tsl.count()) as u16;
        raw[33..35].copy_from_slice(&u16::to_le_bytes(total));
    }
    /// No byte count on disk.  Binary files carry an address/length
    /// header, tokenized files a length word, text files end at the first
    /// zero byte.
    pub fn file_size(&self,store: &dyn SectorStore,_alloc: &Dos3xAlloc,raw: &[u8],list: &GroupList) -> usize {
        let type_bits = raw[2] & 0x7f;
        let first = match list.first() {
            Some(f) => f,
            None => return 0
        };
        let head = match store.read_sector(first.track,first.side,first.sector_start) {
            Ok(b) => b,
            Err(_) => return list.size()
        };
        match type_bits {
            TYPE_BINARY => usize::min(u16::from_le_bytes([head[2],head[3]]) as usize + 4,list.capacity()),
            TYPE_INTEGER | TYPE_APPLESOFT => usize::min(u16::from_le_bytes([head[0],head[1]]) as usize + 2,list.capacity()),
            TYPE_TEXT => {
                let mut total = 0;
                for r in list.iter() {
                    if let Ok(buf) = store.read_sector(r.track,r.side,r.sector_start) {
                        if let Some(term) = buf.iter().position(|b| *b==0x00) {
                            return total + term;
                        }
                        total += buf.len();
                    }
                }
                total
            },
            _ => list.size()
        }
    }
    pub fn create(&self,attr: &DirItemAttr,start: u32) -> Result<Vec<u8>,DYNERR> {
        if attr.name.is_empty() || attr.name.len() > NAME_LEN || !attr.name.is_ascii() {
            return Err(Box::new(Error::BadName));
        }
        let mut raw = vec![0;ENTRY_LEN];
        raw[0] = (start / 16) as u8;
        raw[1] = (start % 16) as u8;
        if !attr.ignore_type {
            raw[2] = match attr.native_type {
                Some(t) => t as u8,
                None => attr_bits(attr.common)
            };
        }
        for (i,b) in super::pack_name(&attr.name.to_uppercase(),NAME_LEN,0x20).iter().enumerate() {
            raw[3+i] = b | 0x80;
        }
        Ok(raw)
    }
    pub fn rename(&self,raw: &mut [u8],name: &str) -> STDRESULT {
        let probe = self.create(&DirItemAttr::named(name),0)?;
        raw[3..3+NAME_LEN].copy_from_slice(&probe[3..3+NAME_LEN]);
        Ok(())
    }
    /// The original list track is stashed in the last name byte, the way
    /// DOS leaves room for undeletion.
    pub fn tombstone(&self,raw: &mut [u8]) {
        raw[3+NAME_LEN-1] = raw[0];
        raw[0] = DELETED;
    }
    pub fn has_date(&self) -> bool {
        false
    }
    pub fn has_addresses(&self) -> bool {
        true
    }
    /// load address from the binary file header
    pub fn start_addr(&self,store: &dyn SectorStore,raw: &[u8],list: &GroupList) -> Option<u16> {
        if raw[2] & 0x7f != TYPE_BINARY {
            return None;
        }
        let first = list.first()?;
        let head = store.read_sector(first.track,first.side,first.sector_start).ok()?;
        Some(u16::from_le_bytes([head[0],head[1]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::templates;
    use crate::fs::FormatKind;

    fn setup() -> (crate::store::MemStore,Dos3xAlloc) {
        let t = templates::template(FormatKind::AppleDos);
        let mut store = t.blank_store();
        let alloc = Dos3xAlloc::open(t.translator().expect("bad translator"));
        alloc.format_disk(&mut store,254).expect("format failed");
        (store,alloc)
    }
    #[test]
    fn bitmap_bits() {
        let (offset,mask) = bitmap_coords(0,15);
        assert_eq!((offset,mask),(0x38,0x80));
        let (offset,mask) = bitmap_coords(1,0);
        assert_eq!((offset,mask),(0x3d,0x01));
    }
    #[test]
    fn first_free_after_format() {
        let (store,alloc) = setup();
        // track below the VTOC, top sector first
        let g = alloc.next_empty_group(&store,None).expect("io").expect("full");
        assert_eq!(alloc.group_to_pair(g),(16,15));
    }
    #[test]
    fn boot_and_vtoc_tracks_reserved() {
        let (store,alloc) = setup();
        let map = alloc.disk_free_map(&store).expect("io");
        for s in 0..16 {
            assert_eq!(map[s],UnitState::System);
            assert_eq!(map[VTOC_TRACK*16 + s],UnitState::System);
        }
        assert_eq!(map[16*16 + 5],UnitState::Free);
    }
    #[test]
    fn catalog_chain() {
        let (store,alloc) = setup();
        let cat = alloc.root_groups(&store).expect("bad catalog");
        assert_eq!(cat.count(),15);
        assert_eq!(alloc.group_to_pair(cat.first().unwrap().group),(17,15));
        assert_eq!(alloc.group_to_pair(cat.last().unwrap().group),(17,1));
    }
    #[test]
    fn index_spills_after_122_pairs() {
        let (mut store,alloc) = setup();
        let codec = Dos3xEntries::new();
        let data = alloc.allocate_groups(&mut store,130*256,None).expect("allocation failed");
        let tsl = codec.write_index(&mut store,&alloc,&data).expect("index failed");
        assert_eq!(tsl.count(),2);
        let mut raw = codec.create(&DirItemAttr::named("BIGFILE"),0).expect("bad entry");
        codec.set_index(&mut raw,&alloc,&tsl,data.count());
        // chain from the entry resolves both list sectors and all data
        let walked_tsl = codec.index_groups(&store,&alloc,&raw).expect("walk failed");
        assert_eq!(walked_tsl.count(),2);
        let walked = codec.groups(&store,&alloc,&raw).expect("walk failed");
        assert_eq!(walked.count(),130);
        assert_eq!(u16::from_le_bytes([raw[33],raw[34]]),132);
    }
    #[test]
    fn tombstone_stashes_track() {
        let codec = Dos3xEntries::new();
        let mut raw = codec.create(&DirItemAttr::named("DOOMED"),0x13*16+12).expect("bad entry");
        assert!(codec.check_used(&raw,false));
        codec.tombstone(&mut raw);
        assert!(!codec.check_used(&raw,false));
        assert_eq!(raw[3+NAME_LEN-1],0x13);
    }
}
