//! ### Commodore 1541 file system
//!
//! The BAM on track 18 sector 0 keeps a per-track free count and bitmap.
//! Data sectors chain through their own first two bytes: next track and
//! next sector, with track 0 ending the chain and the second byte then
//! giving the index of the last valid data byte.  A sector therefore
//! carries 254 bytes of file data.
//!
//! Directory sectors live on track 18, chained the same way, with eight
//! 32 byte slots each.  On-disk track numbers are 1-based; group numbers
//! used internally are flat 0-based positions over the zoned geometry.

use log::{trace,debug};
use crate::store::{SectorStore,patch_sector};
use crate::chs::Translator;
use crate::{DYNERR,STDRESULT};
use super::{Error,FormatKind,FileAttr,GroupRef,GroupList,UnitState,DirItemAttr,DirLayout};

pub const DIR_TRACK: usize = 17;
pub const BAM_SECTOR: usize = 0;
pub const FIRST_DIR_SECTOR: usize = 1;
pub const ENTRY_LEN: usize = 32;
pub const NAME_LEN: usize = 16;
pub const DATA_SKIP: usize = 2;
pub const DATA_PER_SECTOR: usize = 254;
const PAD: u8 = 0xa0;

// type byte: low nibble selects, bit 6 locks, bit 7 closes
pub const TYPE_DEL: u8 = 0x00;
pub const TYPE_SEQ: u8 = 0x01;
pub const TYPE_PRG: u8 = 0x02;
pub const TYPE_USR: u8 = 0x03;
pub const TYPE_REL: u8 = 0x04;
pub const LOCKED: u8 = 0x40;
pub const CLOSED: u8 = 0x80;

/// Allocation strategy over the BAM.
pub struct C1541Alloc {
    xlat: Translator,
    sec_size: usize,
    dir_track: usize
}

impl C1541Alloc {
    pub fn open(xlat: Translator) -> Self {
        Self {
            xlat,
            sec_size: 256,
            dir_track: DIR_TRACK
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
    /// bytes of chain header at the start of each data sector
    pub fn data_skip(&self) -> usize {
        DATA_SKIP
    }
    fn bam_coords(&self) -> Result<(usize,usize,usize),DYNERR> {
        let (t,s,sec) = self.xlat.store_coords(self.xlat.to_logical_flat(self.dir_track,0)? + BAM_SECTOR)?;
        Ok((t,s,sec))
    }
    fn read_bam(&self,store: &dyn SectorStore) -> Result<Vec<u8>,DYNERR> {
        let (t,s,sec) = self.bam_coords()?;
        store.read_sector(t,s,sec)
    }
    /// group from an on-disk 1-based (track, sector) pair
    pub fn pair_to_group(&self,track: u8,sector: u8) -> Option<u32> {
        if track == 0 || track as usize > self.xlat.track_count() {
            return None;
        }
        let t = track as usize - 1;
        if sector as usize >= self.xlat.sectors(t) {
            return None;
        }
        match self.xlat.to_logical_flat(t,0) {
            Ok(base) => Some((base + sector as usize) as u32),
            Err(_) => None
        }
    }
    pub fn group_to_pair(&self,group: u32) -> Result<(u8,u8),DYNERR> {
        let mut pos = group as usize;
        for t in 0..self.xlat.track_count() {
            let secs = self.xlat.sectors(t);
            if pos < secs {
                return Ok(((t+1) as u8,pos as u8));
            }
            pos -= secs;
        }
        Err(Box::new(Error::Range))
    }
    pub fn group_ref(&self,group: u32) -> Result<GroupRef,DYNERR> {
        if group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        let (track,side,sec) = self.xlat.store_coords(group as usize)?;
        Ok(GroupRef::simple(group,track,side,sec))
    }
    /// BAM entry offset and bit for an on-disk pair
    fn bam_bit(track: u8,sector: u8) -> (usize,u8) {
        (4*track as usize + 1 + sector as usize/8,1 << (sector % 8))
    }
    pub fn is_group_used(&self,store: &dyn SectorStore,group: u32) -> Result<bool,DYNERR> {
        let (track,sector) = self.group_to_pair(group)?;
        let bam = self.read_bam(store)?;
        let (offset,mask) = Self::bam_bit(track,sector);
        Ok(bam[offset] & mask == 0)
    }
    pub fn group_value(&self,store: &dyn SectorStore,group: u32) -> Result<u32,DYNERR> {
        Ok(match self.is_group_used(store,group)? {
            true => 1,
            false => 0
        })
    }
    /// Flip one BAM bit and maintain the track's free count.
    pub fn set_group_value(&self,store: &mut dyn SectorStore,group: u32,val: u32) -> STDRESULT {
        let (track,sector) = self.group_to_pair(group)?;
        let bam = self.read_bam(store)?;
        let (offset,mask) = Self::bam_bit(track,sector);
        let was_free = bam[offset] & mask > 0;
        let (byte,count) = match val {
            0 => (bam[offset] | mask,match was_free {
                true => bam[4*track as usize],
                false => bam[4*track as usize] + 1
            }),
            _ => (bam[offset] & !mask,match was_free {
                true => bam[4*track as usize] - 1,
                false => bam[4*track as usize]
            })
        };
        let (t,s,sec) = self.bam_coords()?;
        patch_sector(store,t,s,sec,4*track as usize,&[count])?;
        patch_sector(store,t,s,sec,offset,&[byte])
    }
    /// Track order moving outward from the directory track.
    fn track_order(&self) -> Vec<usize> {
        let cyls = self.xlat.track_count();
        let mut ans = Vec::new();
        for d in 1..cyls {
            if self.dir_track >= d {
                ans.push(self.dir_track - d);
            }
            if self.dir_track + d < cyls {
                ans.push(self.dir_track + d);
            }
        }
        ans
    }
    fn search_order(&self,include_dir_track: bool) -> Result<Vec<u32>,DYNERR> {
        let mut ans = Vec::new();
        let mut tracks = Vec::new();
        if include_dir_track {
            tracks.push(self.dir_track);
        }
        tracks.append(&mut self.track_order());
        for t in tracks {
            let base = self.xlat.to_logical_flat(t,0)?;
            for s in 0..self.xlat.sectors(t) {
                ans.push((base + s) as u32);
            }
        }
        Ok(ans)
    }
    pub fn next_empty_group(&self,store: &dyn SectorStore,prev: Option<u32>) -> Result<Option<u32>,DYNERR> {
        let bam = self.read_bam(store)?;
        let order = self.search_order(false)?;
        let start = match prev {
            Some(p) => match order.iter().position(|g| *g==p) {
                Some(i) => i+1,
                None => 0
            },
            None => 0
        };
        for g in &order[start..] {
            let (track,sector) = self.group_to_pair(*g)?;
            let (offset,mask) = Self::bam_bit(track,sector);
            if bam[offset] & mask > 0 {
                return Ok(Some(*g));
            }
        }
        Ok(None)
    }
    /// Reserve sectors and write the embedded chain headers.  The last
    /// sector's header records the index of its last valid byte.  On
    /// failure both BAM bits and already-written headers are rolled back.
    pub fn allocate_groups(&self,store: &mut dyn SectorStore,size: usize,prev: Option<&GroupList>) -> Result<GroupList,DYNERR> {
        let bpg = self.bytes_per_group();
        let needed = match size {
            0 => 1,
            s => (s + bpg - 1) / bpg
        };
        let mut list = GroupList::new(bpg);
        let mut written: Vec<u32> = Vec::new();
        let old_terminal = match prev {
            Some(p) => p.last().map(|r| *r),
            None => None
        };
        let mut last: Option<GroupRef> = None;
        for i in 0..needed {
            let g = match self.next_empty_group(store,last.map(|r| r.group))? {
                Some(g) => g,
                None => {
                    for w in &written {
                        self.set_group_value(store,*w,0)?;
                    }
                    if let Some(r0) = old_terminal {
                        patch_sector(store,r0.track,r0.side,r0.sector_start,0,&[0,0xff])?;
                    }
                    debug!("no space for sector {} of {}",i+1,needed);
                    return Err(match written.is_empty() && old_terminal.is_none() {
                        true => Box::new(Error::NoSpaceBeforeStart),
                        false => Box::new(Error::NoSpaceAfterStart)
                    });
                }
            };
            self.set_group_value(store,g,1)?;
            let r = self.group_ref(g)?;
            let (track,sector) = self.group_to_pair(g)?;
            match (last,old_terminal,i) {
                (Some(p),_,_) => patch_sector(store,p.track,p.side,p.sector_start,0,&[track,sector])?,
                (None,Some(r0),0) => patch_sector(store,r0.track,r0.side,r0.sector_start,0,&[track,sector])?,
                _ => {}
            };
            written.push(g);
            list.push(r);
            last = Some(r);
        }
        // terminal header: track 0, last valid byte index
        let rem = match size % bpg {
            0 if size>0 => bpg,
            r => r
        };
        let last_byte = (DATA_SKIP + usize::max(rem,1) - 1) as u8;
        if let Some(r) = last {
            patch_sector(store,r.track,r.side,r.sector_start,0,&[0,last_byte])?;
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
        let bam = self.read_bam(store)?;
        let mut ans = Vec::new();
        for g in 0..self.end_group() {
            let (track,sector) = self.group_to_pair(g)?;
            let (offset,mask) = Self::bam_bit(track,sector);
            ans.push(match (bam[offset] & mask > 0,track as usize - 1 == self.dir_track) {
                (true,_) => UnitState::Free,
                (false,true) => UnitState::System,
                (false,false) => UnitState::Used
            });
        }
        Ok(ans)
    }
    /// Follow the embedded chain from `start`.
    pub fn chain(&self,store: &dyn SectorStore,start: u32) -> Result<GroupList,DYNERR> {
        let mut list = GroupList::new(self.bytes_per_group());
        let mut size = 0;
        let mut g = start;
        for _rep in 0..self.end_group() {
            let r = self.group_ref(g)?;
            list.push(r);
            let buf = store.read_sector(r.track,r.side,r.sector_start)?;
            if buf[0] == 0 {
                if (buf[1] as usize) < DATA_SKIP {
                    return Err(Box::new(Error::Structural));
                }
                size += buf[1] as usize - DATA_SKIP + 1;
                list.set_size(size);
                return Ok(list);
            }
            size += self.bytes_per_group();
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
        let bam = match self.read_bam(store) {
            Ok(b) => b,
            Err(_) => return -1.0
        };
        // first directory pointer and the format marker
        if self.pair_to_group(bam[0],bam[1]).is_none() {
            return -1.0;
        }
        if bam[2] != 0x41 {
            debug!("format marker {:02x} is not `A`",bam[2]);
            return -1.0;
        }
        let mut score = 0.5;
        // free counts must agree with the bitmaps
        let mut bad = 0;
        for t in 1..=self.xlat.track_count() {
            let mut free = 0;
            for s in 0..self.xlat.sectors(t-1) {
                let (offset,mask) = Self::bam_bit(t as u8,s as u8);
                if bam[offset] & mask > 0 {
                    free += 1;
                }
            }
            if bam[4*t] as usize != free {
                bad += 1;
            }
        }
        if bad == 0 {
            score += 0.5;
        } else if bad > self.xlat.track_count()/4 {
            return -1.0;
        }
        score
    }
    pub fn parse_geometry(&mut self,store: &dyn SectorStore,_formatting: bool) -> f64 {
        if store.track_count() != self.xlat.track_count() {
            debug!("declared geometry disagrees with the image");
            return -1.0;
        }
        1.0
    }
    /// Directory chain starting at the pair the BAM points to.
    pub fn root_groups(&self,store: &dyn SectorStore) -> Result<GroupList,DYNERR> {
        let bam = self.read_bam(store)?;
        let mut list = GroupList::new(self.sec_size);
        let mut next = (bam[0],bam[1]);
        for _rep in 0..self.end_group() {
            if next.0 == 0 {
                list.set_size(list.capacity());
                return Ok(list);
            }
            let g = match self.pair_to_group(next.0,next.1) {
                Some(g) => g,
                None => return Err(Box::new(Error::Structural))
            };
            list.push(self.group_ref(g)?);
            let r = list.last().unwrap();
            let buf = store.read_sector(r.track,r.side,r.sector_start)?;
            next = (buf[0],buf[1]);
        }
        Err(Box::new(Error::ChainLimit))
    }
    /// Grow the directory by one sector, staying on the directory track.
    pub fn expand_root(&self,store: &mut dyn SectorStore) -> Result<Option<GroupRef>,DYNERR> {
        let bam = self.read_bam(store)?;
        let order = self.search_order(true)?;
        let mut found = None;
        for g in order {
            let (track,sector) = self.group_to_pair(g)?;
            if track as usize - 1 != self.dir_track {
                continue;
            }
            let (offset,mask) = Self::bam_bit(track,sector);
            if bam[offset] & mask > 0 {
                found = Some(g);
                break;
            }
        }
        let g = match found {
            Some(g) => g,
            None => return Ok(None)
        };
        self.set_group_value(store,g,1)?;
        let tail = self.root_groups(store)?;
        let r = self.group_ref(g)?;
        let mut fresh = vec![0;self.sec_size];
        fresh[1] = 0xff;
        store.write_sector(r.track,r.side,r.sector_start,&fresh)?;
        let (track,sector) = self.group_to_pair(g)?;
        match tail.last() {
            Some(old) => patch_sector(store,old.track,old.side,old.sector_start,0,&[track,sector])?,
            None => return Err(Box::new(Error::Structural))
        };
        Ok(Some(r))
    }
    pub fn volume_name(&self,store: &dyn SectorStore) -> Result<String,DYNERR> {
        let (t,s,sec) = self.bam_coords()?;
        let bam = store.read_sector(t,s,sec)?;
        Ok(super::unpack_name(&bam[0x90..0xa0],PAD))
    }
    pub fn set_volume_name(&self,store: &mut dyn SectorStore,name: &str) -> STDRESULT {
        if name.is_empty() || name.len() > NAME_LEN || !name.is_ascii() {
            return Err(Box::new(Error::BadName));
        }
        let (t,s,sec) = self.bam_coords()?;
        patch_sector(store,t,s,sec,0x90,&super::pack_name(&name.to_uppercase(),NAME_LEN,PAD))
    }
    pub fn format_disk(&self,store: &mut dyn SectorStore,name: &str,id: [u8;2]) -> STDRESULT {
        let mut bam = vec![0;self.sec_size];
        bam[0] = (self.dir_track+1) as u8;
        bam[1] = FIRST_DIR_SECTOR as u8;
        bam[2] = 0x41;
        for t in 1..=self.xlat.track_count() {
            let secs = self.xlat.sectors(t-1);
            bam[4*t] = secs as u8;
            for s in 0..secs {
                let (offset,mask) = Self::bam_bit(t as u8,s as u8);
                bam[offset] |= mask;
            }
        }
        // BAM and the first directory sector are taken
        for s in [BAM_SECTOR,FIRST_DIR_SECTOR] {
            let (offset,mask) = Self::bam_bit((self.dir_track+1) as u8,s as u8);
            bam[offset] &= !mask;
            bam[4*(self.dir_track+1)] -= 1;
        }
        bam[0x90..0xa0].copy_from_slice(&super::pack_name(&name.to_uppercase(),NAME_LEN,PAD));
        bam[0xa2] = id[0];
        bam[0xa3] = id[1];
        bam[0xa5] = 0x32;
        bam[0xa6] = 0x41;
        let (t,s,sec) = self.bam_coords()?;
        store.write_sector(t,s,sec,&bam)?;
        let mut dir = vec![0;self.sec_size];
        dir[1] = 0xff;
        let (t,s,sec) = self.xlat.store_coords(self.xlat.to_logical_flat(self.dir_track,0)? + FIRST_DIR_SECTOR)?;
        store.write_sector(t,s,sec,&dir)
    }
}

/// Directory entry codec: 32 byte slots, type byte, start pair, 16 byte
/// padded name, sector count.  The first two bytes of each slot belong to
/// the sector chain header and are ignored here.
/// native type byte derived from the common mask
fn attr_bits(common: u16) -> u8 {
    let mut native = CLOSED | match (common & super::TOKENIZED > 0,common & super::RANDOM > 0) {
        (true,_) => TYPE_PRG,
        (false,true) => TYPE_REL,
        _ => TYPE_SEQ
    };
    if common & super::READ_ONLY > 0 {
        native |= LOCKED;
    }
    native
}

pub struct C1541Entries {
}

impl C1541Entries {
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
        let t = raw[2];
        if t == TYPE_DEL {
            return true;
        }
        if t & 0x30 != 0 || t & 0x0f > TYPE_REL {
            return false;
        }
        true
    }
    pub fn check_used(&self,raw: &[u8],_unuse_hint: bool) -> bool {
        raw[2] != TYPE_DEL
    }
    pub fn name(&self,raw: &[u8]) -> String {
        super::unpack_name(&raw[5..5+NAME_LEN],PAD)
    }
    pub fn name_bytes<'a>(&self,raw: &'a [u8]) -> &'a [u8] {
        &raw[5..5+NAME_LEN]
    }
    pub fn get_attr(&self,raw: &[u8]) -> FileAttr {
        let native = raw[2];
        let mut common = match native & 0x0f {
            TYPE_SEQ => super::ASCII,
            TYPE_PRG => super::TOKENIZED,
            TYPE_REL => super::RANDOM,
            _ => super::BINARY
        };
        if native & LOCKED > 0 {
            common |= super::READ_ONLY;
        }
        FileAttr {
            format: FormatKind::C1541,
            common,
            origin: [native as u32,0,0]
        }
    }
    pub fn set_attr(&self,raw: &mut [u8],attr: &FileAttr) {
        if attr.format == FormatKind::C1541 {
            raw[2] = attr.origin[0] as u8;
            return;
        }
        raw[2] = attr_bits(attr.common);
    }
    pub fn start_group_pair(&self,raw: &[u8]) -> Option<(u8,u8)> {
        match self.check_used(raw,false) {
            true => Some((raw[3],raw[4])),
            false => None
        }
    }
    pub fn set_start(&self,raw: &mut [u8],alloc: &C1541Alloc,list: &GroupList) -> STDRESULT {
        if let Some(first) = list.first() {
            let (t,s) = alloc.group_to_pair(first.group)?;
            raw[3] = t;
            raw[4] = s;
        }
        raw[30..32].copy_from_slice(&u16::to_le_bytes(list.count() as u16));
        Ok(())
    }
    pub fn groups(&self,store: &dyn SectorStore,alloc: &C1541Alloc,raw: &[u8]) -> Result<GroupList,DYNERR> {
        match self.start_group_pair(raw) {
            Some((t,s)) => match alloc.pair_to_group(t,s) {
                Some(g) => alloc.chain(store,g),
                None => Err(Box::new(Error::Structural))
            },
            None => Ok(GroupList::new(alloc.bytes_per_group()))
        }
    }
    /// the chain's terminal header gives the exact byte count
    pub fn file_size(&self,_store: &dyn SectorStore,_alloc: &C1541Alloc,_raw: &[u8],list: &GroupList) -> usize {
        list.size()
    }
    pub fn create(&self,attr: &DirItemAttr,_start: u32) -> Result<Vec<u8>,DYNERR> {
        if attr.name.is_empty() || attr.name.len() > NAME_LEN || !attr.name.is_ascii() {
            return Err(Box::new(Error::BadName));
        }
        let mut raw = vec![0;ENTRY_LEN];
        if !attr.ignore_type {
            raw[2] = match attr.native_type {
                Some(t) => t as u8,
                None => attr_bits(attr.common)
            };
        } else {
            raw[2] = CLOSED | TYPE_PRG;
        }
        raw[5..5+NAME_LEN].copy_from_slice(&super::pack_name(&attr.name.to_uppercase(),NAME_LEN,PAD));
        Ok(raw)
    }
    pub fn rename(&self,raw: &mut [u8],name: &str) -> STDRESULT {
        let probe = self.create(&DirItemAttr::named(name),0)?;
        raw[5..5+NAME_LEN].copy_from_slice(&probe[5..5+NAME_LEN]);
        Ok(())
    }
    pub fn tombstone(&self,raw: &mut [u8]) {
        raw[2] = TYPE_DEL;
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

    fn setup() -> (crate::store::MemStore,C1541Alloc) {
        let t = templates::template(FormatKind::C1541);
        let mut store = t.blank_store();
        let alloc = C1541Alloc::open(t.translator().expect("bad translator"));
        alloc.format_disk(&mut store,"TESTDISK",[0x31,0x41]).expect("format failed");
        (store,alloc)
    }
    #[test]
    fn pair_group_round_trip() {
        let (_store,alloc) = setup();
        // track 18 starts after 17 tracks of 21 sectors
        assert_eq!(alloc.pair_to_group(18,0),Some(357));
        assert_eq!(alloc.group_to_pair(357).expect("range"),(18,0));
        // zone boundary: track 25 has 18 sectors
        let g = alloc.pair_to_group(25,17).expect("bad pair");
        assert_eq!(alloc.group_to_pair(g).expect("range"),(25,17));
        assert_eq!(alloc.pair_to_group(25,18),None);
    }
    #[test]
    fn bam_counts_track_free() {
        let (mut store,alloc) = setup();
        let bam = alloc.read_bam(&store).expect("io");
        // directory track lost two sectors to BAM and first dir sector
        assert_eq!(bam[4*18],17);
        assert_eq!(bam[4*1],21);
        let g = alloc.pair_to_group(1,5).expect("bad pair");
        alloc.set_group_value(&mut store,g,1).expect("io");
        let bam = alloc.read_bam(&store).expect("io");
        assert_eq!(bam[4*1],20);
    }
    #[test]
    fn chain_headers_written() {
        let (mut store,alloc) = setup();
        let list = alloc.allocate_groups(&mut store,600,None).expect("allocation failed");
        assert_eq!(list.count(),3); // 600 = 2*254 + 92
        let walked = alloc.chain(&store,list.first().unwrap().group).expect("chain failed");
        assert_eq!(walked.count(),3);
        assert_eq!(walked.size(),600);
        let last = list.last().unwrap();
        let buf = store.read_sector(last.track,last.side,last.sector_start).expect("io");
        assert_eq!(buf[0],0);
        assert_eq!(buf[1] as usize,DATA_SKIP + 92 - 1);
    }
    #[test]
    fn allocation_avoids_directory_track() {
        let (mut store,alloc) = setup();
        let list = alloc.allocate_groups(&mut store,254*30,None).expect("allocation failed");
        for r in list.iter() {
            let (t,_s) = alloc.group_to_pair(r.group).expect("range");
            assert_ne!(t as usize - 1,DIR_TRACK);
        }
    }
    #[test]
    fn directory_expands_on_track_18() {
        let (mut store,alloc) = setup();
        let before = alloc.root_groups(&store).expect("bad dir").count();
        let added = alloc.expand_root(&mut store).expect("io").expect("dir track full");
        let (t,_s) = alloc.group_to_pair(added.group).expect("range");
        assert_eq!(t as usize - 1,DIR_TRACK);
        assert_eq!(alloc.root_groups(&store).expect("bad dir").count(),before+1);
    }
}
