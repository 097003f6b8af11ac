//! ### MZ disk BASIC and CDOS file systems
//!
//! Both keep a one-bit-per-sector bitmap in a fixed sector and store
//! every file as one contiguous run of sectors, so the entry needs only a
//! start sector and a byte count.  The directory is a fixed region at the
//! front of the disk.
//!
//! The two variants share the allocator and differ in the entry record:
//! MZ disk BASIC uses a 17 character name with a carriage-return
//! terminator plus load and execute addresses; CDOS uses an 8.3 name with
//! a month/day/year date.

use log::{trace,debug};
use chrono::Datelike;
use crate::store::{SectorStore,patch_sector};
use crate::chs::Translator;
use crate::{DYNERR,STDRESULT};
use super::{Error,FormatKind,FileAttr,GroupRef,GroupList,UnitState,DirItemAttr,DirLayout};

pub const BOOT_SECTOR: usize = 0;
pub const DIR_POSITIONS: std::ops::Range<usize> = 1..15;
pub const BITMAP_POSITION: usize = 15;
pub const ENTRY_LEN: usize = 32;
pub const MZ_NAME_LEN: usize = 17;
/// name terminator byte in MZ entries
pub const MZ_TERM: u8 = 0x0d;
const DELETED: u8 = 0xff;
const CDOS_DELETED: u8 = 0xe5;
const CDOS_USED: u8 = 0x80;
const CDOS_RO: u8 = 0x01;

// MZ type byte values
pub const TYPE_OBJ: u8 = 0x01;
pub const TYPE_BTX: u8 = 0x02;
pub const TYPE_BSD: u8 = 0x03;
pub const TYPE_BRD: u8 = 0x04;

/// Allocation strategy over the sector bitmap, shared by both variants.
pub struct MzAlloc {
    xlat: Translator,
    sec_size: usize,
    kind: FormatKind
}

impl MzAlloc {
    pub fn open(xlat: Translator,kind: FormatKind) -> Self {
        Self {
            xlat,
            sec_size: 256,
            kind
        }
    }
    pub fn xlat(&self) -> &Translator {
        &self.xlat
    }
    pub fn kind(&self) -> FormatKind {
        self.kind
    }
    pub fn end_group(&self) -> u32 {
        self.xlat.positions() as u32
    }
    pub fn bytes_per_group(&self) -> usize {
        self.sec_size
    }
    fn data_start(&self) -> u32 {
        (BITMAP_POSITION + 1) as u32
    }
    fn bitmap_coords(&self) -> Result<(usize,usize,usize),DYNERR> {
        Ok(self.xlat.store_coords(BITMAP_POSITION)?)
    }
    fn read_bitmap(&self,store: &dyn SectorStore) -> Result<Vec<u8>,DYNERR> {
        let (t,s,sec) = self.bitmap_coords()?;
        store.read_sector(t,s,sec)
    }
    pub fn group_ref(&self,group: u32) -> Result<GroupRef,DYNERR> {
        if group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        let (track,side,sec) = self.xlat.store_coords(group as usize)?;
        Ok(GroupRef::simple(group,track,side,sec))
    }
    pub fn is_group_used(&self,store: &dyn SectorStore,group: u32) -> Result<bool,DYNERR> {
        if group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        let bitmap = self.read_bitmap(store)?;
        Ok(bitmap[group as usize / 8] & (1 << (group % 8)) > 0)
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
        let bitmap = self.read_bitmap(store)?;
        let offset = group as usize / 8;
        let mask = 1u8 << (group % 8);
        let byte = match val {
            0 => bitmap[offset] & !mask,
            _ => bitmap[offset] | mask
        };
        let (t,s,sec) = self.bitmap_coords()?;
        patch_sector(store,t,s,sec,offset,&[byte])
    }
    pub fn next_empty_group(&self,store: &dyn SectorStore,prev: Option<u32>) -> Result<Option<u32>,DYNERR> {
        let bitmap = self.read_bitmap(store)?;
        let start = match prev {
            Some(p) => p+1,
            None => self.data_start()
        };
        for g in start..self.end_group() {
            if bitmap[g as usize / 8] & (1 << (g % 8)) == 0 {
                return Ok(Some(g));
            }
        }
        Ok(None)
    }
    /// Find and mark a contiguous free run.  Files are never fragmented,
    /// so a fitting hole must exist or the allocation fails whole.
    pub fn allocate_groups(&self,store: &mut dyn SectorStore,size: usize,prev: Option<&GroupList>) -> Result<GroupList,DYNERR> {
        let bpg = self.bytes_per_group();
        let needed = match size {
            0 => 1,
            s => (s + bpg - 1) / bpg
        };
        let bitmap = self.read_bitmap(store)?;
        let mut run_start = self.data_start();
        let mut run_len = 0;
        let mut found = None;
        for g in self.data_start()..self.end_group() {
            if bitmap[g as usize / 8] & (1 << (g % 8)) == 0 {
                if run_len == 0 {
                    run_start = g;
                }
                run_len += 1;
                if run_len == needed {
                    found = Some(run_start);
                    break;
                }
            } else {
                run_len = 0;
            }
        }
        let start = match found {
            Some(s) => s,
            None => {
                debug!("no contiguous hole of {} sectors",needed);
                return Err(match prev.map(|p| p.count()).unwrap_or(0) {
                    0 => Box::new(Error::NoSpaceBeforeStart),
                    _ => Box::new(Error::NoSpaceAfterStart)
                });
            }
        };
        let mut list = GroupList::new(bpg);
        for g in start..start+needed as u32 {
            self.set_group_value(store,g,1)?;
            list.push(self.group_ref(g)?);
        }
        list.set_size(size);
        trace!("allocated run of {} at {}",needed,start);
        Ok(list)
    }
    pub fn delete_groups(&self,store: &mut dyn SectorStore,list: &GroupList) -> STDRESULT {
        for g in list.iter() {
            self.set_group_value(store,g.group,0)?;
        }
        Ok(())
    }
    pub fn disk_free_map(&self,store: &dyn SectorStore) -> Result<Vec<UnitState>,DYNERR> {
        let bitmap = self.read_bitmap(store)?;
        let mut ans = Vec::new();
        for g in 0..self.end_group() {
            let used = bitmap[g as usize / 8] & (1 << (g % 8)) > 0;
            ans.push(match (used,g < self.data_start()) {
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
        let bitmap = match self.read_bitmap(store) {
            Ok(b) => b,
            Err(_) => return -1.0
        };
        // the system region must read used
        for g in 0..self.data_start() {
            if bitmap[g as usize / 8] & (1 << (g % 8)) == 0 {
                debug!("system sector {} reads free",g);
                return -1.0;
            }
        }
        // bits beyond the sector count must be clear
        let end = self.end_group() as usize;
        for g in end..bitmap.len()*8 {
            if bitmap[g/8] & (1 << (g % 8)) > 0 {
                return -1.0;
            }
        }
        // directory occupancy and data-region usage must tell one story
        let mut data_used = 0;
        for g in self.data_start() as usize..end {
            if bitmap[g/8] & (1 << (g % 8)) > 0 {
                data_used += 1;
            }
        }
        let mut entries = 0;
        for pos in DIR_POSITIONS {
            if let Ok((t,s,sec)) = self.xlat.store_coords(pos) {
                if let Ok(buf) = store.read_sector(t,s,sec) {
                    for slot in buf.chunks_exact(ENTRY_LEN) {
                        let live = match self.kind {
                            FormatKind::Cdos => slot[0] & CDOS_USED > 0 && slot[0] != CDOS_DELETED,
                            _ => slot[0] >= TYPE_OBJ && slot[0] <= TYPE_BRD
                        };
                        if live {
                            entries += 1;
                        }
                    }
                }
            }
        }
        match (entries,data_used) {
            (0,0) => 0.9,
            (0,_) | (_,0) => 0.5,
            _ => 0.9
        }
    }
    pub fn parse_geometry(&mut self,store: &dyn SectorStore,_formatting: bool) -> f64 {
        if store.track_count() != self.xlat.track_count() || store.side_count() != self.xlat.side_count() {
            debug!("declared geometry disagrees with the image");
            return -1.0;
        }
        1.0
    }
    pub fn root_groups(&self,_store: &dyn SectorStore) -> Result<GroupList,DYNERR> {
        let mut list = GroupList::new(self.sec_size);
        for pos in DIR_POSITIONS {
            let (t,s,sec) = self.xlat.store_coords(pos)?;
            list.push(GroupRef::simple(pos as u32,t,s,sec));
        }
        list.set_size(list.capacity());
        Ok(list)
    }
    pub fn format_disk(&self,store: &mut dyn SectorStore) -> STDRESULT {
        let zero = vec![0;self.sec_size];
        for pos in DIR_POSITIONS {
            let (t,s,sec) = self.xlat.store_coords(pos)?;
            store.write_sector(t,s,sec,&zero)?;
        }
        let mut bitmap = vec![0;self.sec_size];
        for g in 0..self.data_start() {
            bitmap[g as usize / 8] |= 1 << (g % 8);
        }
        let (t,s,sec) = self.bitmap_coords()?;
        store.write_sector(t,s,sec,&bitmap)
    }
}

/// Directory entry codec for both variants.
pub struct MzEntries {
    kind: FormatKind
}

impl MzEntries {
    pub fn new(kind: FormatKind) -> Self {
        Self {
            kind
        }
    }
    fn is_cdos(&self) -> bool {
        self.kind == FormatKind::Cdos
    }
    pub fn layout(&self) -> DirLayout {
        DirLayout::Flat {entry_len: ENTRY_LEN, sector_skip: 0, root_skip: 0}
    }
    pub fn check(&self,raw: &[u8],_last: &mut bool) -> bool {
        if raw.len() < ENTRY_LEN {
            return false;
        }
        if self.is_cdos() {
            if raw[0] == 0x00 || raw[0] == CDOS_DELETED {
                return true;
            }
            if raw[0] & !(CDOS_USED | CDOS_RO) != 0 {
                return false;
            }
            return raw[12] <= 12 && raw[13] <= 31;
        }
        if raw[0] == 0x00 || raw[0] == DELETED {
            return true;
        }
        if raw[0] > TYPE_BRD {
            return false;
        }
        // reserved bytes must be clear on a live entry
        raw[19] == 0 && raw[26..30].iter().all(|b| *b==0)
    }
    pub fn check_used(&self,raw: &[u8],_unuse_hint: bool) -> bool {
        match self.is_cdos() {
            true => raw[0] & CDOS_USED > 0 && raw[0] != CDOS_DELETED,
            false => raw[0] != 0x00 && raw[0] != DELETED
        }
    }
    pub fn name(&self,raw: &[u8]) -> String {
        if self.is_cdos() {
            let base = super::unpack_name(&raw[1..9],0x20);
            let ext = super::unpack_name(&raw[9..12],0x20);
            return match ext.len() {
                0 => base,
                _ => [base,".".to_string(),ext].concat()
            };
        }
        super::unpack_name(&raw[1..1+MZ_NAME_LEN],MZ_TERM)
    }
    pub fn name_bytes<'a>(&self,raw: &'a [u8]) -> &'a [u8] {
        match self.is_cdos() {
            true => &raw[1..12],
            false => &raw[1..1+MZ_NAME_LEN]
        }
    }
    pub fn get_attr(&self,raw: &[u8]) -> FileAttr {
        if self.is_cdos() {
            let mut common = super::BINARY;
            if raw[0] & CDOS_RO > 0 {
                common |= super::READ_ONLY;
            }
            return FileAttr {
                format: FormatKind::Cdos,
                common,
                origin: [raw[0] as u32,0,0]
            };
        }
        let common = match raw[0] {
            TYPE_OBJ => super::BINARY | super::MACHINE,
            TYPE_BTX => super::TOKENIZED,
            TYPE_BSD => super::ASCII,
            TYPE_BRD => super::BINARY | super::RANDOM,
            _ => super::BINARY
        };
        FileAttr {
            format: FormatKind::MzBasic,
            common,
            origin: [raw[0] as u32,0,0]
        }
    }
    pub fn set_attr(&self,raw: &mut [u8],attr: &FileAttr) {
        if attr.format == self.kind {
            raw[0] = attr.origin[0] as u8;
            return;
        }
        raw[0] = self.attr_bits(attr.common);
    }
    /// mode byte derived from the common mask
    fn attr_bits(&self,common: u16) -> u8 {
        if self.is_cdos() {
            return CDOS_USED | match common & super::READ_ONLY > 0 {
                true => CDOS_RO,
                false => 0
            };
        }
        match (common & super::MACHINE > 0,common & super::TOKENIZED > 0,common & super::RANDOM > 0) {
            (true,_,_) => TYPE_OBJ,
            (false,true,_) => TYPE_BTX,
            (false,false,true) => TYPE_BRD,
            _ => TYPE_BSD
        }
    }
    fn start_offset(&self) -> usize {
        match self.is_cdos() {
            true => 18,
            false => 30
        }
    }
    fn size_offset(&self) -> usize {
        match self.is_cdos() {
            true => 16,
            false => 20
        }
    }
    pub fn start_group(&self,raw: &[u8]) -> Option<u32> {
        if !self.check_used(raw,false) {
            return None;
        }
        let off = self.start_offset();
        Some(u16::from_le_bytes([raw[off],raw[off+1]]) as u32)
    }
    /// Contiguous expansion from the start sector and byte count.
    pub fn groups(&self,_store: &dyn SectorStore,alloc: &MzAlloc,raw: &[u8]) -> Result<GroupList,DYNERR> {
        let mut list = GroupList::new(alloc.bytes_per_group());
        let start = match self.start_group(raw) {
            Some(s) => s,
            None => return Ok(list)
        };
        let off = self.size_offset();
        let size = u16::from_le_bytes([raw[off],raw[off+1]]) as usize;
        let count = usize::max(1,(size + alloc.bytes_per_group() - 1) / alloc.bytes_per_group());
        for g in start..start + count as u32 {
            list.push(alloc.group_ref(g)?);
        }
        list.set_size(size);
        Ok(list)
    }
    pub fn file_size(&self,_store: &dyn SectorStore,_alloc: &MzAlloc,raw: &[u8],_list: &GroupList) -> usize {
        let off = self.size_offset();
        u16::from_le_bytes([raw[off],raw[off+1]]) as usize
    }
    pub fn set_start_and_size(&self,raw: &mut [u8],start: u32,size: usize) {
        let off = self.start_offset();
        raw[off..off+2].copy_from_slice(&u16::to_le_bytes(start as u16));
        let off = self.size_offset();
        raw[off..off+2].copy_from_slice(&u16::to_le_bytes(size as u16));
    }
    pub fn create(&self,attr: &DirItemAttr,start: u32) -> Result<Vec<u8>,DYNERR> {
        let mut raw = vec![0;ENTRY_LEN];
        if self.is_cdos() {
            let (base,ext) = match attr.name.split_once('.') {
                Some((b,x)) => (b.to_string(),x.to_string()),
                None => (attr.name.clone(),String::new())
            };
            if base.is_empty() || base.len() > 8 || ext.len() > 3 || !base.is_ascii() {
                return Err(Box::new(Error::BadName));
            }
            raw[1..9].copy_from_slice(&super::pack_name(&base.to_uppercase(),8,0x20));
            raw[9..12].copy_from_slice(&super::pack_name(&ext.to_uppercase(),3,0x20));
            if !attr.ignore_date {
                let date = match attr.datetime {
                    Some(dt) => dt.date(),
                    None => chrono::Local::now().naive_local().date()
                };
                raw[12] = date.month() as u8;
                raw[13] = date.day() as u8;
                raw[14] = (date.year() % 100) as u8;
            }
        } else {
            if attr.name.is_empty() || attr.name.len() > MZ_NAME_LEN || !attr.name.is_ascii() {
                return Err(Box::new(Error::BadName));
            }
            let packed = super::pack_name(&attr.name,MZ_NAME_LEN,0x00);
            raw[1..1+MZ_NAME_LEN].copy_from_slice(&packed);
            if attr.name.len() < MZ_NAME_LEN {
                raw[1+attr.name.len()] = MZ_TERM;
            }
            if let Some(a) = attr.start_addr {
                raw[22..24].copy_from_slice(&u16::to_le_bytes(a));
            }
            if let Some(a) = attr.exec_addr {
                raw[24..26].copy_from_slice(&u16::to_le_bytes(a));
            }
        }
        if !attr.ignore_type {
            raw[0] = match attr.native_type {
                Some(t) => t as u8,
                None => self.attr_bits(attr.common)
            };
        } else if self.is_cdos() {
            raw[0] = CDOS_USED;
        } else {
            raw[0] = TYPE_BSD;
        }
        let off = self.start_offset();
        raw[off..off+2].copy_from_slice(&u16::to_le_bytes(start as u16));
        Ok(raw)
    }
    pub fn rename(&self,raw: &mut [u8],name: &str) -> STDRESULT {
        let probe = self.create(&DirItemAttr {name: name.to_string(), ignore_date: true, ignore_type: true, ..Default::default()},0)?;
        match self.is_cdos() {
            true => raw[1..12].copy_from_slice(&probe[1..12]),
            false => raw[1..1+MZ_NAME_LEN].copy_from_slice(&probe[1..1+MZ_NAME_LEN])
        };
        Ok(())
    }
    pub fn tombstone(&self,raw: &mut [u8]) {
        raw[0] = match self.is_cdos() {
            true => CDOS_DELETED,
            false => DELETED
        };
    }
    pub fn has_date(&self) -> bool {
        self.is_cdos()
    }
    pub fn get_date(&self,raw: &[u8]) -> Option<chrono::NaiveDateTime> {
        if !self.is_cdos() || raw[12] == 0 {
            return None;
        }
        let year = match raw[14] {
            y if y < 75 => 2000 + y as i32,
            y => 1900 + y as i32
        };
        Some(chrono::NaiveDate::from_ymd_opt(year,raw[12] as u32,raw[13] as u32)?
            .and_hms_opt(0,0,0)?)
    }
    pub fn has_addresses(&self) -> bool {
        !self.is_cdos()
    }
    pub fn start_addr(&self,raw: &[u8]) -> Option<u16> {
        match self.is_cdos() {
            true => None,
            false => Some(u16::from_le_bytes([raw[22],raw[23]]))
        }
    }
    pub fn exec_addr(&self,raw: &[u8]) -> Option<u16> {
        match self.is_cdos() {
            true => None,
            false => Some(u16::from_le_bytes([raw[24],raw[25]]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::templates;

    fn setup(kind: FormatKind) -> (crate::store::MemStore,MzAlloc) {
        let t = templates::template(kind);
        let mut store = t.blank_store();
        let alloc = MzAlloc::open(t.translator().expect("bad translator"),kind);
        alloc.format_disk(&mut store).expect("format failed");
        (store,alloc)
    }
    #[test]
    fn runs_are_contiguous() {
        let (mut store,alloc) = setup(FormatKind::MzBasic);
        let a = alloc.allocate_groups(&mut store,1000,None).expect("allocation failed");
        let b = alloc.allocate_groups(&mut store,1000,None).expect("allocation failed");
        assert_eq!(a.first().unwrap().group,16);
        assert_eq!(b.first().unwrap().group,20);
        for w in a.iter().zip(a.iter().skip(1)) {
            assert_eq!(w.1.group,w.0.group+1);
        }
    }
    #[test]
    fn hole_is_reused_only_when_it_fits() {
        let (mut store,alloc) = setup(FormatKind::MzBasic);
        let a = alloc.allocate_groups(&mut store,2*256,None).expect("allocation failed");
        let _b = alloc.allocate_groups(&mut store,4*256,None).expect("allocation failed");
        alloc.delete_groups(&mut store,&a).expect("delete failed");
        // three sectors do not fit the two sector hole
        let c = alloc.allocate_groups(&mut store,3*256,None).expect("allocation failed");
        assert_eq!(c.first().unwrap().group,22);
        let d = alloc.allocate_groups(&mut store,2*256,None).expect("allocation failed");
        assert_eq!(d.first().unwrap().group,16);
    }
    #[test]
    fn mz_entry_addresses() {
        let codec = MzEntries::new(FormatKind::MzBasic);
        let attr = DirItemAttr {
            name: "MACHINE PROGRAM".to_string(),
            common: crate::fs::MACHINE,
            start_addr: Some(0x1200),
            exec_addr: Some(0x1200),
            ..Default::default()
        };
        let mut raw = codec.create(&attr,16).expect("bad entry");
        codec.set_start_and_size(&mut raw,16,2000);
        assert_eq!(codec.name(&raw),"MACHINE PROGRAM");
        assert_eq!(raw[0],TYPE_OBJ);
        assert_eq!(codec.start_addr(&raw),Some(0x1200));
        assert_eq!(codec.start_group(&raw),Some(16));
    }
    #[test]
    fn cdos_entry_date() {
        let codec = MzEntries::new(FormatKind::Cdos);
        let dt = chrono::NaiveDate::from_ymd_opt(1979,11,2).unwrap().and_hms_opt(0,0,0).unwrap();
        let attr = DirItemAttr {
            name: "WORK.DAT".to_string(),
            datetime: Some(dt),
            ..Default::default()
        };
        let raw = codec.create(&attr,16).expect("bad entry");
        assert_eq!(codec.name(&raw),"WORK.DAT");
        assert_eq!(codec.get_date(&raw),Some(dt));
        assert!(codec.check_used(&raw,false));
    }
    #[test]
    fn groups_follow_stored_size() {
        let (mut store,alloc) = setup(FormatKind::MzBasic);
        let codec = MzEntries::new(FormatKind::MzBasic);
        let list = alloc.allocate_groups(&mut store,700,None).expect("allocation failed");
        let mut raw = codec.create(&DirItemAttr::named("NOTES"),0).expect("bad entry");
        codec.set_start_and_size(&mut raw,list.first().unwrap().group,700);
        let walked = codec.groups(&store,&alloc,&raw).expect("walk failed");
        assert_eq!(walked.count(),3);
        assert_eq!(walked.size(),700);
    }
}
