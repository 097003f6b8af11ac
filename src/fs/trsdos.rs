//! ### TRSDOS file systems
//!
//! Covers the 1.3 and 2.x directory flavors.  Both keep everything on a
//! dedicated directory track: the granule allocation table (GAT) in
//! sector 0, the hash index table (HIT) in sector 1, and the entry
//! sectors after that.  The GAT holds one byte per track with one bit per
//! granule, unused high bits set; the HIT holds one name-hash byte per
//! directory slot, zero meaning free.
//!
//! A file's storage is recorded as extents inside its own entry: each
//! extent names a starting granule and a contiguous run length.  The 2.x
//! entry is 32 bytes with room for 5 extents and reserves the last two
//! slots of every entry sector for system files; the 1.3 entry is 48
//! bytes with 13 extents, a date, and no slot reservation.

use log::{trace,debug};
use chrono::Datelike;
use crate::store::{SectorStore,patch_sector};
use crate::chs::Translator;
use crate::{DYNERR,STDRESULT};
use super::{Error,FormatKind,FileAttr,GroupRef,GroupList,UnitState,DirItemAttr,DirLayout};

pub const GAT_SECTOR: usize = 0;
pub const HIT_SECTOR: usize = 1;
pub const FIRST_ENTRY_SECTOR: usize = 2;
/// GAT offset of the volume name
pub const VOL_NAME_OFFSET: usize = 0xd0;
pub const VOL_NAME_LEN: usize = 8;
const UNUSED_EXTENT: u8 = 0xff;

// flag byte bits
pub const IN_USE: u8 = 0x10;
pub const SYSTEM: u8 = 0x40;
pub const INVISIBLE: u8 = 0x08;
pub const PROTECT_MASK: u8 = 0x07;
/// password hash meaning no password
pub const NO_PASSWORD: [u8;2] = [0x96,0x42];

/// Per-variant layout constants
#[derive(Clone,Copy)]
pub struct Variant {
    pub kind: FormatKind,
    pub dir_track: usize,
    pub gran_secs: usize,
    pub grans_per_track: usize,
    pub entry_len: usize,
    pub extents: usize,
    pub has_date: bool,
    /// last two slots of each entry sector reserved for system files
    pub slot_affinity: bool
}

pub fn variant(kind: FormatKind) -> Variant {
    match kind {
        FormatKind::Trsdos13 => Variant {
            kind,
            dir_track: 17,
            gran_secs: 6,
            grans_per_track: 3,
            entry_len: 48,
            extents: 13,
            has_date: true,
            slot_affinity: false
        },
        _ => Variant {
            kind: FormatKind::Trsdos2x,
            dir_track: 17,
            gran_secs: 5,
            grans_per_track: 2,
            entry_len: 32,
            extents: 5,
            has_date: false,
            slot_affinity: true
        }
    }
}

/// TRSDOS filename hash, rotate-left and XOR over the padded 11 byte
/// name field; zero is reserved for a free slot.
pub fn hash(name_field: &[u8]) -> u8 {
    let mut h: u8 = 0;
    for b in name_field {
        h = h.rotate_left(1) ^ b;
    }
    match h {
        0 => 1,
        x => x
    }
}

/// Allocation strategy over the GAT.
pub struct TrsdosAlloc {
    xlat: Translator,
    sec_size: usize,
    var: Variant
}

impl TrsdosAlloc {
    pub fn open(xlat: Translator,kind: FormatKind) -> Self {
        Self {
            xlat,
            sec_size: 256,
            var: variant(kind)
        }
    }
    pub fn xlat(&self) -> &Translator {
        &self.xlat
    }
    pub fn variant(&self) -> Variant {
        self.var
    }
    pub fn end_group(&self) -> u32 {
        (self.xlat.track_count() * self.var.grans_per_track) as u32
    }
    pub fn bytes_per_group(&self) -> usize {
        self.var.gran_secs * self.sec_size
    }
    fn spt(&self) -> usize {
        self.xlat.sectors(0)
    }
    fn dir_coords(&self,sector: usize) -> Result<(usize,usize,usize),DYNERR> {
        Ok(self.xlat.store_coords(self.var.dir_track * self.spt() + sector)?)
    }
    fn read_gat(&self,store: &dyn SectorStore) -> Result<Vec<u8>,DYNERR> {
        let (t,s,sec) = self.dir_coords(GAT_SECTOR)?;
        store.read_sector(t,s,sec)
    }
    /// mask a track byte should carry in its unused bit positions
    fn unused_mask(&self) -> u8 {
        !((1u16 << self.var.grans_per_track) as u8 - 1)
    }
    pub fn group_ref(&self,group: u32) -> Result<GroupRef,DYNERR> {
        if group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        let track = group as usize / self.var.grans_per_track;
        let gran = group as usize % self.var.grans_per_track;
        let pos0 = track * self.spt() + gran * self.var.gran_secs;
        let (t,s,sec0) = self.xlat.store_coords(pos0)?;
        let (_,_,sec1) = self.xlat.store_coords(pos0 + self.var.gran_secs - 1)?;
        Ok(GroupRef {
            group,
            track: t,
            side: s,
            sector_start: sec0,
            sector_end: sec1,
            div: None,
            tag: 0
        })
    }
    pub fn is_group_used(&self,store: &dyn SectorStore,group: u32) -> Result<bool,DYNERR> {
        if group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        let gat = self.read_gat(store)?;
        let track = group as usize / self.var.grans_per_track;
        let gran = group as usize % self.var.grans_per_track;
        Ok(gat[track] & (1 << gran) > 0)
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
        let gat = self.read_gat(store)?;
        let track = group as usize / self.var.grans_per_track;
        let gran = group as usize % self.var.grans_per_track;
        let byte = match val {
            0 => gat[track] & !(1 << gran),
            _ => gat[track] | (1 << gran)
        };
        let (t,s,sec) = self.dir_coords(GAT_SECTOR)?;
        patch_sector(store,t,s,sec,track,&[byte])
    }
    /// Ascending first-fit, skipping the directory track.
    fn search_order(&self) -> Vec<u32> {
        let mut ans = Vec::new();
        for t in 0..self.xlat.track_count() {
            if t == self.var.dir_track {
                continue;
            }
            for g in 0..self.var.grans_per_track {
                ans.push((t*self.var.grans_per_track + g) as u32);
            }
        }
        ans
    }
    pub fn next_empty_group(&self,store: &dyn SectorStore,prev: Option<u32>) -> Result<Option<u32>,DYNERR> {
        let gat = self.read_gat(store)?;
        let order = self.search_order();
        let start = match prev {
            Some(p) => match order.iter().position(|g| *g==p) {
                Some(i) => i+1,
                None => 0
            },
            None => 0
        };
        for g in &order[start..] {
            let track = *g as usize / self.var.grans_per_track;
            let gran = *g as usize % self.var.grans_per_track;
            if gat[track] & (1 << gran) == 0 {
                return Ok(Some(*g));
            }
        }
        Ok(None)
    }
    pub fn allocate_groups(&self,store: &mut dyn SectorStore,size: usize,prev: Option<&GroupList>) -> Result<GroupList,DYNERR> {
        let bpg = self.bytes_per_group();
        let needed = match size {
            0 => 0,
            s => (s + bpg - 1) / bpg
        };
        let mut list = GroupList::new(bpg);
        let mut written: Vec<u32> = Vec::new();
        let mut last = match prev {
            Some(p) => p.last().map(|r| r.group),
            None => None
        };
        let appending = last.is_some();
        for i in 0..needed {
            let g = match self.next_empty_group(store,last)? {
                Some(g) => g,
                None => {
                    for w in &written {
                        self.set_group_value(store,*w,0)?;
                    }
                    debug!("no space for granule {} of {}",i+1,needed);
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
        list.set_size(size);
        trace!("allocated {} granules",list.count());
        Ok(list)
    }
    pub fn delete_groups(&self,store: &mut dyn SectorStore,list: &GroupList) -> STDRESULT {
        for g in list.iter() {
            self.set_group_value(store,g.group,0)?;
        }
        Ok(())
    }
    pub fn disk_free_map(&self,store: &dyn SectorStore) -> Result<Vec<UnitState>,DYNERR> {
        let gat = self.read_gat(store)?;
        let mut ans = Vec::new();
        for g in 0..self.end_group() {
            let track = g as usize / self.var.grans_per_track;
            let gran = g as usize % self.var.grans_per_track;
            ans.push(match (gat[track] & (1 << gran) > 0,track == self.var.dir_track) {
                (_,true) => UnitState::System,
                (true,false) => UnitState::Used,
                (false,false) => UnitState::Free
            });
        }
        Ok(ans)
    }
    /// HIT byte for a directory slot
    pub fn hit_get(&self,store: &dyn SectorStore,slot: usize) -> Result<u8,DYNERR> {
        let (t,s,sec) = self.dir_coords(HIT_SECTOR)?;
        let buf = store.read_sector(t,s,sec)?;
        match slot < buf.len() {
            true => Ok(buf[slot]),
            false => Err(Box::new(Error::Range))
        }
    }
    pub fn hit_set(&self,store: &mut dyn SectorStore,slot: usize,h: u8) -> STDRESULT {
        let (t,s,sec) = self.dir_coords(HIT_SECTOR)?;
        patch_sector(store,t,s,sec,slot,&[h])
    }
    pub fn check_consistency(&self,store: &dyn SectorStore,formatting: bool) -> f64 {
        if formatting {
            return 0.0;
        }
        let gat = match self.read_gat(store) {
            Ok(g) => g,
            Err(_) => return -1.0
        };
        let mask = self.unused_mask();
        let mut bad = 0;
        for t in 0..self.xlat.track_count() {
            if gat[t] & mask != mask {
                bad += 1;
            }
        }
        // the directory track's own granules must be marked used
        if gat[self.var.dir_track] & !mask != !mask & 0xff {
            bad += 4;
        }
        if bad > self.xlat.track_count()/8 {
            debug!("GAT rejected with {} bad track bytes",bad);
            return -1.0;
        }
        let mut score = 1.0 - bad as f64 * 8.0 / self.xlat.track_count() as f64;
        if super::printable_fraction(&gat[VOL_NAME_OFFSET..VOL_NAME_OFFSET+VOL_NAME_LEN]) < 0.5 {
            score -= 0.5;
        }
        score
    }
    pub fn parse_geometry(&mut self,store: &dyn SectorStore,_formatting: bool) -> f64 {
        if store.track_count() != self.xlat.track_count() || store.sector_count(0,0) != self.spt() {
            debug!("declared geometry disagrees with the image");
            return -1.0;
        }
        1.0
    }
    /// Entry sectors on the directory track.
    pub fn root_groups(&self,_store: &dyn SectorStore) -> Result<GroupList,DYNERR> {
        let mut list = GroupList::new(self.sec_size);
        for sec in FIRST_ENTRY_SECTOR..self.spt() {
            let (t,s,psec) = self.dir_coords(sec)?;
            list.push(GroupRef::simple(0,t,s,psec));
        }
        list.set_size(list.capacity());
        Ok(list)
    }
    /// total directory slots
    pub fn slot_count(&self) -> usize {
        (self.spt() - FIRST_ENTRY_SECTOR) * (self.sec_size / self.var.entry_len)
    }
    pub fn volume_name(&self,store: &dyn SectorStore) -> Result<String,DYNERR> {
        let gat = self.read_gat(store)?;
        Ok(super::unpack_name(&gat[VOL_NAME_OFFSET..VOL_NAME_OFFSET+VOL_NAME_LEN],0x20))
    }
    pub fn set_volume_name(&self,store: &mut dyn SectorStore,name: &str) -> STDRESULT {
        if name.is_empty() || name.len() > VOL_NAME_LEN || !name.is_ascii() {
            return Err(Box::new(Error::BadName));
        }
        let mut gat = self.read_gat(store)?;
        gat[VOL_NAME_OFFSET..VOL_NAME_OFFSET+VOL_NAME_LEN]
            .copy_from_slice(&super::pack_name(&name.to_uppercase(),VOL_NAME_LEN,0x20));
        let (t,s,sec) = self.dir_coords(GAT_SECTOR)?;
        store.write_sector(t,s,sec,&gat)
    }
    pub fn format_disk(&self,store: &mut dyn SectorStore,name: &str) -> STDRESULT {
        let mask = self.unused_mask();
        let mut gat = vec![0;self.sec_size];
        for t in 0..self.xlat.track_count() {
            gat[t] = mask;
        }
        gat[self.var.dir_track] = 0xff;
        gat[VOL_NAME_OFFSET..VOL_NAME_OFFSET+VOL_NAME_LEN]
            .copy_from_slice(&super::pack_name(&name.to_uppercase(),VOL_NAME_LEN,0x20));
        let (t,s,sec) = self.dir_coords(GAT_SECTOR)?;
        store.write_sector(t,s,sec,&gat)?;
        let zero = vec![0;self.sec_size];
        let (t,s,sec) = self.dir_coords(HIT_SECTOR)?;
        store.write_sector(t,s,sec,&zero)?;
        for dsec in FIRST_ENTRY_SECTOR..self.spt() {
            let (t,s,sec) = self.dir_coords(dsec)?;
            store.write_sector(t,s,sec,&zero)?;
        }
        Ok(())
    }
}

/// Directory entry codec for both variants.  Layout: flag byte, date
/// (1.3 only), end-of-file offset, 8+3 name, password hashes, record
/// count, then the extent pairs.
/// flag byte derived from the common mask, always marked in use
fn attr_bits(common: u16) -> u8 {
    let mut native = IN_USE;
    if common & super::SYSTEM > 0 {
        native |= SYSTEM;
    }
    if common & super::HIDDEN > 0 {
        native |= INVISIBLE;
    }
    if common & super::READ_ONLY > 0 {
        native |= PROTECT_MASK;
    }
    native
}

pub struct TrsdosEntries {
    var: Variant
}

impl TrsdosEntries {
    pub fn new(kind: FormatKind) -> Self {
        Self {
            var: variant(kind)
        }
    }
    pub fn layout(&self) -> DirLayout {
        DirLayout::Flat {entry_len: self.var.entry_len, sector_skip: 0, root_skip: 0}
    }
    fn extent_base(&self) -> usize {
        22
    }
    pub fn check(&self,raw: &[u8],_last: &mut bool) -> bool {
        if raw.len() < self.var.entry_len {
            return false;
        }
        if raw[0] & IN_USE == 0 {
            return true;
        }
        if raw[0] & 0xa0 != 0 {
            return false;
        }
        if self.var.has_date && (raw[1] > 12 || raw[2] > 99) {
            return false;
        }
        true
    }
    pub fn check_used(&self,raw: &[u8],_unuse_hint: bool) -> bool {
        raw[0] & IN_USE > 0
    }
    pub fn name(&self,raw: &[u8]) -> String {
        let base = super::unpack_name(&raw[5..13],0x20);
        let ext = super::unpack_name(&raw[13..16],0x20);
        match ext.len() {
            0 => base,
            _ => [base,"/".to_string(),ext].concat()
        }
    }
    pub fn name_bytes<'a>(&self,raw: &'a [u8]) -> &'a [u8] {
        &raw[5..16]
    }
    /// hash of this entry's name field, as the HIT stores it
    pub fn name_hash(&self,raw: &[u8]) -> u8 {
        hash(&raw[5..16])
    }
    pub fn get_attr(&self,raw: &[u8]) -> FileAttr {
        let native = raw[0];
        let mut common = super::BINARY;
        if native & SYSTEM > 0 {
            common |= super::SYSTEM;
        }
        if native & INVISIBLE > 0 {
            common |= super::HIDDEN;
        }
        if native & PROTECT_MASK > 0 {
            common |= super::READ_ONLY;
        }
        FileAttr {
            format: self.var.kind,
            common,
            origin: [native as u32,0,0]
        }
    }
    pub fn set_attr(&self,raw: &mut [u8],attr: &FileAttr) {
        if attr.format == self.var.kind {
            raw[0] = attr.origin[0] as u8;
            return;
        }
        raw[0] = attr_bits(attr.common);
    }
    pub fn is_system(&self,raw: &[u8]) -> bool {
        raw[0] & SYSTEM > 0
    }
    pub fn start_group(&self,raw: &[u8]) -> Option<u32> {
        if !self.check_used(raw,false) {
            return None;
        }
        let base = self.extent_base();
        match raw[base] {
            UNUSED_EXTENT => None,
            track => Some(track as u32 * self.var.grans_per_track as u32 + (raw[base+1] >> 5) as u32)
        }
    }
    /// Expand the extent pairs into the granule list.
    pub fn groups(&self,_store: &dyn SectorStore,alloc: &TrsdosAlloc,raw: &[u8]) -> Result<GroupList,DYNERR> {
        let mut list = GroupList::new(alloc.bytes_per_group());
        if !self.check_used(raw,false) {
            return Ok(list);
        }
        let base = self.extent_base();
        for i in 0..self.var.extents {
            let track = raw[base + 2*i];
            let ext = raw[base + 2*i + 1];
            if track == UNUSED_EXTENT {
                break;
            }
            let start = track as u32 * self.var.grans_per_track as u32 + (ext >> 5) as u32;
            let count = (ext & 0x1f) as u32 + 1;
            for g in start..start+count {
                list.push(alloc.group_ref(g)?);
            }
        }
        list.set_size(self.stored_size(raw,list.capacity()));
        Ok(list)
    }
    fn stored_size(&self,raw: &[u8],capacity: usize) -> usize {
        let ern = u16::from_le_bytes([raw[20],raw[21]]) as usize;
        if ern == 0 {
            return 0;
        }
        let eof = raw[3] as usize;
        let size = (ern-1)*256 + match eof {
            0 => 256,
            e => e
        };
        usize::min(size,capacity)
    }
    /// Pack the granule list into extents.  A run longer than 32 granules
    /// splits; more runs than the entry has extent slots is a structural
    /// failure the caller must avoid by defragmenting or refusing.
    pub fn set_extents(&self,raw: &mut [u8],alloc: &TrsdosAlloc,list: &GroupList) -> STDRESULT {
        let gpt = alloc.variant().grans_per_track as u32;
        let mut runs: Vec<(u32,u32)> = Vec::new();
        for r in list.iter() {
            match runs.last_mut() {
                Some((start,count)) if *start + *count == r.group && *count < 32 => *count += 1,
                _ => runs.push((r.group,1))
            };
        }
        if runs.len() > self.var.extents {
            debug!("{} runs exceed the {} extent slots",runs.len(),self.var.extents);
            return Err(Box::new(Error::Structural));
        }
        let base = self.extent_base();
        for i in 0..self.var.extents {
            match runs.get(i) {
                Some((start,count)) => {
                    raw[base + 2*i] = (start / gpt) as u8;
                    raw[base + 2*i + 1] = (((start % gpt) as u8) << 5) | (*count as u8 - 1);
                },
                None => {
                    raw[base + 2*i] = UNUSED_EXTENT;
                    raw[base + 2*i + 1] = UNUSED_EXTENT;
                }
            };
        }
        let size = list.size();
        let ern = (size + 255) / 256;
        raw[20..22].copy_from_slice(&u16::to_le_bytes(ern as u16));
        raw[3] = (size % 256) as u8;
        Ok(())
    }
    pub fn file_size(&self,_store: &dyn SectorStore,_alloc: &TrsdosAlloc,raw: &[u8],list: &GroupList) -> usize {
        self.stored_size(raw,list.capacity())
    }
    pub fn create(&self,attr: &DirItemAttr,_start: u32) -> Result<Vec<u8>,DYNERR> {
        let (base,ext) = match attr.name.split_once('/') {
            Some((b,x)) => (b.to_string(),x.to_string()),
            None => (attr.name.clone(),String::new())
        };
        if base.is_empty() || base.len() > 8 || ext.len() > 3 || !base.is_ascii() {
            return Err(Box::new(Error::BadName));
        }
        if !base.chars().next().unwrap().is_ascii_alphabetic() {
            return Err(Box::new(Error::BadName));
        }
        let mut raw = vec![0;self.var.entry_len];
        raw[0] = IN_USE;
        if !attr.ignore_type {
            raw[0] = match attr.native_type {
                Some(t) => t as u8 | IN_USE,
                None => attr_bits(attr.common)
            };
        }
        if self.var.has_date && !attr.ignore_date {
            let date = match attr.datetime {
                Some(dt) => dt.date(),
                None => chrono::Local::now().naive_local().date()
            };
            raw[1] = date.month() as u8;
            raw[2] = (date.year() % 100) as u8;
        }
        raw[5..13].copy_from_slice(&super::pack_name(&base.to_uppercase(),8,0x20));
        raw[13..16].copy_from_slice(&super::pack_name(&ext.to_uppercase(),3,0x20));
        raw[16..18].copy_from_slice(&NO_PASSWORD);
        raw[18..20].copy_from_slice(&NO_PASSWORD);
        let ebase = self.extent_base();
        for i in 0..self.var.extents {
            raw[ebase + 2*i] = UNUSED_EXTENT;
            raw[ebase + 2*i + 1] = UNUSED_EXTENT;
        }
        Ok(raw)
    }
    pub fn rename(&self,raw: &mut [u8],name: &str) -> STDRESULT {
        let probe = self.create(&DirItemAttr {name: name.to_string(), ignore_date: true, ..Default::default()},0)?;
        raw[5..16].copy_from_slice(&probe[5..16]);
        Ok(())
    }
    pub fn tombstone(&self,raw: &mut [u8]) {
        raw[0] &= !IN_USE;
    }
    pub fn has_date(&self) -> bool {
        self.var.has_date
    }
    pub fn get_date(&self,raw: &[u8]) -> Option<chrono::NaiveDateTime> {
        if !self.var.has_date || raw[1] == 0 {
            return None;
        }
        let year = match raw[2] {
            y if y < 75 => 2000 + y as i32,
            y => 1900 + y as i32
        };
        Some(chrono::NaiveDate::from_ymd_opt(year,raw[1] as u32,1)?.and_hms_opt(0,0,0)?)
    }
    pub fn has_addresses(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::templates;

    fn setup(kind: FormatKind) -> (crate::store::MemStore,TrsdosAlloc) {
        let t = templates::template(kind);
        let mut store = t.blank_store();
        let alloc = TrsdosAlloc::open(t.translator().expect("bad translator"),kind);
        alloc.format_disk(&mut store,"TESTDISK").expect("format failed");
        (store,alloc)
    }
    #[test]
    fn hash_is_never_zero() {
        assert_ne!(hash(b"BASIC   CMD"),0);
        assert_ne!(hash(&[0;11]),0);
        // distinct names normally hash apart
        assert_ne!(hash(b"ALPHA   TXT"),hash(b"BETA    TXT"));
    }
    #[test]
    fn gat_unused_bits_stay_high() {
        let (store,alloc) = setup(FormatKind::Trsdos2x);
        let gat = alloc.read_gat(&store).expect("io");
        assert_eq!(gat[0],0xfc);
        assert_eq!(gat[17],0xff);
        assert!(alloc.check_consistency(&store,false) > 0.9);
    }
    #[test]
    fn allocation_skips_directory_track() {
        let (mut store,alloc) = setup(FormatKind::Trsdos2x);
        let bpg = alloc.bytes_per_group();
        let list = alloc.allocate_groups(&mut store,bpg*40,None).expect("allocation failed");
        for r in list.iter() {
            assert_ne!(r.group as usize / alloc.variant().grans_per_track,17);
        }
    }
    #[test]
    fn extents_coalesce_contiguous_runs() {
        let (mut store,alloc) = setup(FormatKind::Trsdos2x);
        let codec = TrsdosEntries::new(FormatKind::Trsdos2x);
        let bpg = alloc.bytes_per_group();
        let list = alloc.allocate_groups(&mut store,bpg*3 + 100,None).expect("allocation failed");
        assert_eq!(list.count(),4);
        let mut raw = codec.create(&DirItemAttr::named("DATA/DAT"),0).expect("bad entry");
        codec.set_extents(&mut raw,&alloc,&list).expect("extents failed");
        // fresh disk: one contiguous run, one extent
        assert_eq!(raw[24],UNUSED_EXTENT);
        let walked = codec.groups(&store,&alloc,&raw).expect("walk failed");
        assert_eq!(walked.count(),4);
        assert_eq!(walked.size(),bpg*3 + 100);
    }
    #[test]
    fn thirteen_extents_on_trsdos13() {
        let codec = TrsdosEntries::new(FormatKind::Trsdos13);
        let raw = codec.create(&DirItemAttr::named("PAYROLL/BAS"),0).expect("bad entry");
        assert_eq!(raw.len(),48);
        assert_eq!(raw[22+2*12],UNUSED_EXTENT);
    }
    #[test]
    fn hit_round_trip() {
        let (mut store,alloc) = setup(FormatKind::Trsdos2x);
        let codec = TrsdosEntries::new(FormatKind::Trsdos2x);
        let raw = codec.create(&DirItemAttr::named("SCRIPT/TXT"),0).expect("bad entry");
        let h = codec.name_hash(&raw);
        alloc.hit_set(&mut store,5,h).expect("io");
        assert_eq!(alloc.hit_get(&store,5).expect("io"),h);
        assert_eq!(alloc.hit_get(&store,4).expect("io"),0);
    }
}
