//! ### FAT12 file system
//!
//! The 12-bit FAT variant found on MS-DOS and MSX-DOS floppies.  The FAT
//! is a cluster pool with forward links: a value tells us whether the
//! cluster is free, damaged, allocated, or terminal.  The first two
//! entries are reserved; cluster 2 is the first data cluster.  The boot
//! sector carries the parameter block we parse geometry from; nothing
//! from the caller's template is trusted over the disk's own say-so.

use chrono::{Datelike,Timelike};
use log::{trace,debug};
use a2kit_macro::{DiskStructError,DiskStruct};
use a2kit_macro_derive::DiskStruct;
use crate::store::SectorStore;
use crate::chs::Translator;
use crate::{DYNERR,STDRESULT};
use super::{Error,FormatKind,FileAttr,GroupRef,GroupList,UnitState,DirItemAttr,DirLayout};

pub const ENTRY_LEN: usize = 32;
pub const FIRST_DATA_CLUSTER: u32 = 2;
const EOC_MIN: u32 = 0xff8;
const EOC_SET: u32 = 0xfff;
const BAD_CLUSTER: u32 = 0xff7;
const FREE_CLUSTER: u32 = 0;
/// first name byte of a free entry
const FREE: u8 = 0xe5;
/// first name byte of a free entry with no used entries following
const FREE_AND_NO_MORE: u8 = 0x00;

// attribute bits
pub const READ_ONLY: u8 = 0x01;
pub const HIDDEN: u8 = 0x02;
pub const SYSTEM: u8 = 0x04;
pub const VOLUME_ID: u8 = 0x08;
pub const DIRECTORY: u8 = 0x10;
pub const ARCHIVE: u8 = 0x20;

/// Characters forbidden from file names
pub const INVALID_CHARS: &str = "\"*+,/:;<=>?[\\]|";

/// get the value of cluster `n` from a buffer holding the entire FAT
pub fn get_cluster(n: usize,buf: &[u8]) -> u32 {
    let offset = n + n/2;
    let val16 = u16::from_le_bytes([buf[offset],buf[offset+1]]);
    if n & 1 == 1 {
        (val16 >> 4) as u32
    } else {
        (val16 & 0x0fff) as u32
    }
}

/// set the value of cluster `n` in a buffer holding the entire FAT
pub fn set_cluster(n: usize,val: u32,buf: &mut [u8]) {
    let offset = n + n/2;
    if n & 1 == 1 {
        let val12 = (val as u16) << 4;
        let low4 = 0x000f & u16::from_le_bytes([buf[offset],buf[offset+1]]);
        let val16 = u16::to_le_bytes(val12 | low4);
        buf[offset] = val16[0];
        buf[offset+1] = val16[1];
    } else {
        let val12 = (val as u16) & 0x0fff;
        let high4 = 0xf000 & u16::from_le_bytes([buf[offset],buf[offset+1]]);
        let val16 = u16::to_le_bytes(val12 | high4);
        buf[offset] = val16[0];
        buf[offset+1] = val16[1];
    }
}

pub fn pack_date(time: Option<chrono::NaiveDateTime>) -> [u8;2] {
    let now = match time {
        Some(t) => t,
        _ => chrono::Local::now().naive_local()
    };
    let year = match now.year() {
        y if y < 1980 => 1980,
        y if y > 2107 => 2107,
        y => y
    };
    u16::to_le_bytes(now.day() as u16 + ((now.month() as u16) << 5) + ((year as u16 - 1980) << 9))
}

pub fn pack_time(time: Option<chrono::NaiveDateTime>) -> [u8;2] {
    let now = match time {
        Some(t) => t,
        _ => chrono::Local::now().naive_local()
    };
    u16::to_le_bytes((now.second() as u16) / 2 + ((now.minute() as u16) << 5) + ((now.hour() as u16) << 11))
}

pub fn unpack_datetime(date: [u8;2],time: [u8;2]) -> Option<chrono::NaiveDateTime> {
    if date == [0,0] {
        return None;
    }
    let date16 = u16::from_le_bytes(date);
    let time16 = u16::from_le_bytes(time);
    let d = chrono::NaiveDate::from_ymd_opt(1980 + (date16 >> 9) as i32,
        ((date16 & 0b0000_0001_1110_0000) >> 5) as u32,(date16 & 0b1_1111) as u32)?;
    let t = chrono::NaiveTime::from_hms_opt((time16 >> 11) as u32,
        ((time16 & 0b0000_0111_1110_0000) >> 5) as u32,((time16 & 0b1_1111) * 2) as u32)?;
    Some(d.and_time(t))
}

pub fn is_name_valid(s: &str) -> bool {
    let it: Vec<&str> = s.split('.').collect();
    if it.len() > 2 {
        return false;
    }
    let base = it[0];
    let ext = match it.len() {
        1 => "",
        _ => it[1]
    };
    for char in [base,ext].concat().chars() {
        if !char.is_ascii() || INVALID_CHARS.contains(char) || char.is_ascii_control() {
            debug!("bad file name character `{}`",char);
            return false;
        }
    }
    base.len() >= 1 && base.len() <= 8 && ext.len() <= 3
}

/// 32 byte directory record
#[derive(DiskStruct)]
pub struct Entry {
    pub name: [u8;8],
    pub ext: [u8;3],
    pub attr: u8,
    nt_res: u8,
    creation_tenth: u8,
    creation_time: [u8;2],
    creation_date: [u8;2],
    access_date: [u8;2],
    cluster_high: [u8;2],
    write_time: [u8;2],
    write_date: [u8;2],
    cluster_low: [u8;2],
    pub file_size: [u8;4]
}

/// Boot-sector parameter fields this layer cares about
#[derive(Clone,Copy)]
struct Params {
    sec_size: usize,
    secs_per_cluster: usize,
    reserved_secs: usize,
    num_fats: usize,
    root_entries: usize,
    total_secs: usize,
    media: u8,
    secs_per_fat: usize
}

impl Params {
    fn from_boot(boot: &[u8]) -> Option<Self> {
        if boot.len() < 30 {
            return None;
        }
        Some(Self {
            sec_size: u16::from_le_bytes([boot[11],boot[12]]) as usize,
            secs_per_cluster: boot[13] as usize,
            reserved_secs: u16::from_le_bytes([boot[14],boot[15]]) as usize,
            num_fats: boot[16] as usize,
            root_entries: u16::from_le_bytes([boot[17],boot[18]]) as usize,
            total_secs: u16::from_le_bytes([boot[19],boot[20]]) as usize,
            media: boot[21],
            secs_per_fat: u16::from_le_bytes([boot[22],boot[23]]) as usize
        })
    }
    fn plausible(&self) -> bool {
        self.sec_size.is_power_of_two() && self.sec_size >= 128 && self.sec_size <= 4096
            && self.secs_per_cluster.is_power_of_two() && self.secs_per_cluster <= 128
            && self.num_fats >= 1 && self.num_fats <= 2
            && self.root_entries > 0 && self.root_entries % (self.sec_size/ENTRY_LEN) == 0
            && self.media >= 0xf0
            && self.secs_per_fat > 0
            && self.total_secs > self.first_data_sec()
    }
    fn root_sec1(&self) -> usize {
        self.reserved_secs + self.num_fats*self.secs_per_fat
    }
    fn root_secs(&self) -> usize {
        self.root_entries*ENTRY_LEN / self.sec_size
    }
    fn first_data_sec(&self) -> usize {
        self.root_sec1() + self.root_secs()
    }
    fn cluster_count(&self) -> usize {
        (self.total_secs - self.first_data_sec()) / self.secs_per_cluster
    }
}

/// Allocation strategy for the packed 12-bit FAT.
pub struct Fat12Alloc {
    xlat: Translator,
    params: Params
}

impl Fat12Alloc {
    pub fn open(xlat: Translator) -> Self {
        // until the boot sector is parsed, assume canonical 360K parameters
        let params = Params {
            sec_size: 512,
            secs_per_cluster: 2,
            reserved_secs: 1,
            num_fats: 2,
            root_entries: 112,
            total_secs: xlat.positions(),
            media: 0xfd,
            secs_per_fat: 2
        };
        Self {
            xlat,
            params
        }
    }
    pub fn xlat(&self) -> &Translator {
        &self.xlat
    }
    pub fn end_group(&self) -> u32 {
        FIRST_DATA_CLUSTER + self.params.cluster_count() as u32
    }
    pub fn bytes_per_group(&self) -> usize {
        self.params.secs_per_cluster * self.params.sec_size
    }
    fn read_lsec(&self,store: &dyn SectorStore,lsec: usize) -> Result<Vec<u8>,DYNERR> {
        let (t,s,sec) = self.xlat.store_coords(lsec)?;
        store.read_sector(t,s,sec)
    }
    fn write_lsec(&self,store: &mut dyn SectorStore,lsec: usize,dat: &[u8]) -> STDRESULT {
        let (t,s,sec) = self.xlat.store_coords(lsec)?;
        store.write_sector(t,s,sec,dat)
    }
    fn read_fat(&self,store: &dyn SectorStore) -> Result<Vec<u8>,DYNERR> {
        let mut ans = Vec::new();
        for i in 0..self.params.secs_per_fat {
            ans.append(&mut self.read_lsec(store,self.params.reserved_secs + i)?);
        }
        Ok(ans)
    }
    fn write_fat(&self,store: &mut dyn SectorStore,fat: &[u8]) -> STDRESULT {
        // both FAT copies are kept in step
        for copy in 0..self.params.num_fats {
            for i in 0..self.params.secs_per_fat {
                let lsec = self.params.reserved_secs + copy*self.params.secs_per_fat + i;
                self.write_lsec(store,lsec,&fat[i*self.params.sec_size..(i+1)*self.params.sec_size])?;
            }
        }
        Ok(())
    }
    pub fn group_ref(&self,group: u32) -> Result<GroupRef,DYNERR> {
        if group < FIRST_DATA_CLUSTER || group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        let pos0 = self.params.first_data_sec() + (group - FIRST_DATA_CLUSTER) as usize * self.params.secs_per_cluster;
        let (track,side,sec0) = self.xlat.store_coords(pos0)?;
        let (_,_,sec1) = self.xlat.store_coords(pos0 + self.params.secs_per_cluster - 1)?;
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
    /// logical sectors backing a cluster, for data transfer
    pub fn group_lsecs(&self,group: u32) -> Vec<usize> {
        let pos0 = self.params.first_data_sec() + (group - FIRST_DATA_CLUSTER) as usize * self.params.secs_per_cluster;
        (pos0..pos0+self.params.secs_per_cluster).collect()
    }
    pub fn group_value(&self,store: &dyn SectorStore,group: u32) -> Result<u32,DYNERR> {
        if group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        Ok(get_cluster(group as usize,&self.read_fat(store)?))
    }
    pub fn set_group_value(&self,store: &mut dyn SectorStore,group: u32,val: u32) -> STDRESULT {
        if group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        let mut fat = self.read_fat(store)?;
        set_cluster(group as usize,val,&mut fat);
        self.write_fat(store,&fat)
    }
    pub fn is_group_used(&self,store: &dyn SectorStore,group: u32) -> Result<bool,DYNERR> {
        Ok(self.group_value(store,group)? != FREE_CLUSTER)
    }
    /// First-fit search starting just past `prev`.
    pub fn next_empty_group(&self,store: &dyn SectorStore,prev: Option<u32>) -> Result<Option<u32>,DYNERR> {
        let fat = self.read_fat(store)?;
        let start = match prev {
            Some(p) => p+1,
            None => FIRST_DATA_CLUSTER
        };
        for g in start..self.end_group() {
            if get_cluster(g as usize,&fat) == FREE_CLUSTER {
                return Ok(Some(g));
            }
        }
        // wrap once for the append case
        for g in FIRST_DATA_CLUSTER..start.min(self.end_group()) {
            if get_cluster(g as usize,&fat) == FREE_CLUSTER {
                return Ok(Some(g));
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
        let mut fat = self.read_fat(store)?;
        let mut list = GroupList::new(bpg);
        let mut last: Option<u32> = match prev {
            Some(p) => p.last().map(|g| g.group),
            None => None
        };
        let first_was_linked = last.is_some();
        for i in 0..needed {
            let mut found: Option<u32> = None;
            let start = match last {
                Some(p) => p+1,
                None => FIRST_DATA_CLUSTER
            };
            for g in (start..self.end_group()).chain(FIRST_DATA_CLUSTER..start.min(self.end_group())) {
                if get_cluster(g as usize,&fat) == FREE_CLUSTER {
                    found = Some(g);
                    break;
                }
            }
            let g = match found {
                Some(g) => g,
                None => {
                    // the buffered FAT is simply not written back
                    debug!("no space for cluster {} of {}",i+1,needed);
                    return Err(match i==0 && !first_was_linked {
                        true => Box::new(Error::NoSpaceBeforeStart),
                        false => Box::new(Error::NoSpaceAfterStart)
                    });
                }
            };
            if let Some(p) = last {
                set_cluster(p as usize,g,&mut fat);
            }
            set_cluster(g as usize,EOC_SET,&mut fat);
            list.push(self.group_ref(g)?);
            last = Some(g);
        }
        self.write_fat(store,&fat)?;
        list.set_size(size);
        trace!("allocated {} clusters",list.count());
        Ok(list)
    }
    pub fn delete_groups(&self,store: &mut dyn SectorStore,list: &GroupList) -> STDRESULT {
        let mut fat = self.read_fat(store)?;
        for g in list.iter() {
            set_cluster(g.group as usize,FREE_CLUSTER,&mut fat);
        }
        self.write_fat(store,&fat)
    }
    pub fn disk_free_map(&self,store: &dyn SectorStore) -> Result<Vec<UnitState>,DYNERR> {
        let fat = self.read_fat(store)?;
        let mut ans = Vec::new();
        for g in FIRST_DATA_CLUSTER..self.end_group() {
            ans.push(match get_cluster(g as usize,&fat) {
                FREE_CLUSTER => UnitState::Free,
                BAD_CLUSTER => UnitState::System,
                v if v >= EOC_MIN => UnitState::UsedLast,
                _ => UnitState::Used
            });
        }
        Ok(ans)
    }
    pub fn chain(&self,store: &dyn SectorStore,start: u32) -> Result<GroupList,DYNERR> {
        let fat = self.read_fat(store)?;
        let mut list = GroupList::new(self.bytes_per_group());
        let mut g = start;
        for _rep in 0..self.end_group() {
            if g < FIRST_DATA_CLUSTER || g >= self.end_group() {
                return Err(Box::new(Error::Structural));
            }
            list.push(self.group_ref(g)?);
            let val = get_cluster(g as usize,&fat);
            if val >= EOC_MIN {
                list.set_size(list.capacity());
                return Ok(list);
            }
            if val == FREE_CLUSTER || val == BAD_CLUSTER {
                debug!("cluster chain ran into value {:03x} at {}",val,g);
                return Err(Box::new(Error::Structural));
            }
            g = val;
        }
        Err(Box::new(Error::ChainLimit))
    }
    pub fn check_consistency(&self,store: &dyn SectorStore,formatting: bool) -> f64 {
        if formatting {
            return 0.0;
        }
        let boot = match self.read_lsec(store,0) {
            Ok(b) => b,
            Err(_) => return -1.0
        };
        if boot[0] != 0xeb && boot[0] != 0xe9 {
            debug!("JMP mismatch {:02x}",boot[0]);
            return -1.0;
        }
        let params = match Params::from_boot(&boot) {
            Some(p) if p.plausible() => p,
            _ => return -1.0
        };
        // FAT entry 0 repeats the media byte
        let mut score = 0.5;
        if let Ok(fat_sec) = self.read_lsec(store,params.reserved_secs) {
            if fat_sec[0] == params.media {
                score += 0.5;
            }
        }
        score
    }
    /// Geometry comes from the disk's own boot sector; caller-declared
    /// values only decide how many sectors the store serves up.
    pub fn parse_geometry(&mut self,store: &dyn SectorStore,formatting: bool) -> f64 {
        if formatting {
            return 1.0;
        }
        let boot = match self.read_lsec(store,0) {
            Ok(b) => b,
            Err(_) => return -1.0
        };
        let params = match Params::from_boot(&boot) {
            Some(p) if p.plausible() => p,
            _ => return -1.0
        };
        let mut score = 1.0;
        if params.total_secs > self.xlat.positions() {
            debug!("disk declares {} sectors, image has {}",params.total_secs,self.xlat.positions());
            score = 0.25;
        }
        if params.sec_size != store.sector_size(0,0) {
            debug!("disk declares {} byte sectors, image has {}",params.sec_size,store.sector_size(0,0));
            return -1.0;
        }
        self.params = params;
        score
    }
    pub fn root_groups(&self,_store: &dyn SectorStore) -> GroupList {
        let mut list = GroupList::new(self.params.sec_size);
        for lsec in self.params.root_sec1()..self.params.first_data_sec() {
            if let Ok((t,s,sec)) = self.xlat.store_coords(lsec) {
                list.push(GroupRef {
                    group: 0,
                    track: t,
                    side: s,
                    sector_start: sec,
                    sector_end: sec,
                    div: None,
                    tag: 0
                });
            }
        }
        list.set_size(self.params.root_entries*ENTRY_LEN);
        list
    }
    pub fn format_disk(&mut self,store: &mut dyn SectorStore) -> STDRESULT {
        let p = &self.params;
        let mut boot = vec![0;p.sec_size];
        boot[0..3].copy_from_slice(&[0xeb,0x3c,0x90]);
        boot[3..11].copy_from_slice(b"RETROFS ");
        boot[11..13].copy_from_slice(&u16::to_le_bytes(p.sec_size as u16));
        boot[13] = p.secs_per_cluster as u8;
        boot[14..16].copy_from_slice(&u16::to_le_bytes(p.reserved_secs as u16));
        boot[16] = p.num_fats as u8;
        boot[17..19].copy_from_slice(&u16::to_le_bytes(p.root_entries as u16));
        boot[19..21].copy_from_slice(&u16::to_le_bytes(p.total_secs as u16));
        boot[21] = p.media;
        boot[22..24].copy_from_slice(&u16::to_le_bytes(p.secs_per_fat as u16));
        boot[24..26].copy_from_slice(&u16::to_le_bytes(self.xlat.sectors(0) as u16));
        boot[26..28].copy_from_slice(&u16::to_le_bytes(self.xlat.side_count() as u16));
        boot[510] = 0x55;
        boot[511] = 0xaa;
        self.write_lsec(store,0,&boot)?;
        let mut fat = vec![0;p.secs_per_fat*p.sec_size];
        set_cluster(0,0xf00 + p.media as u32,&mut fat);
        set_cluster(1,EOC_SET,&mut fat);
        self.write_fat(store,&fat)?;
        let zero = vec![0;p.sec_size];
        for lsec in p.root_sec1()..p.first_data_sec() {
            self.write_lsec(store,lsec,&zero)?;
        }
        Ok(())
    }
}

/// Directory entry codec for the 32 byte records.
/// native attribute byte derived from the common mask
fn attr_bits(common: u16) -> u8 {
    let mut native = 0;
    if common & super::DIRECTORY > 0 {
        native |= DIRECTORY;
    }
    if common & super::VOLUME > 0 {
        native |= VOLUME_ID;
    }
    if common & super::READ_ONLY > 0 {
        native |= READ_ONLY;
    }
    if common & super::HIDDEN > 0 {
        native |= HIDDEN;
    }
    if common & super::SYSTEM > 0 {
        native |= SYSTEM;
    }
    native
}

pub struct Fat12Entries {
}

impl Fat12Entries {
    pub fn new() -> Self {
        Self {}
    }
    pub fn layout(&self) -> DirLayout {
        DirLayout::Flat {entry_len: ENTRY_LEN, sector_skip: 0, root_skip: 0}
    }
    pub fn check(&self,raw: &[u8],last: &mut bool) -> bool {
        if raw.len() < ENTRY_LEN {
            return false;
        }
        if raw[0] == FREE_AND_NO_MORE {
            *last = true;
            return true;
        }
        if raw[0] == FREE {
            return true;
        }
        let attr = raw[11];
        if attr & 0xc0 != 0 {
            return false;
        }
        true
    }
    pub fn check_used(&self,raw: &[u8],_unuse_hint: bool) -> bool {
        raw[0] != FREE && raw[0] != FREE_AND_NO_MORE
    }
    pub fn name(&self,raw: &[u8]) -> String {
        let base = super::unpack_name(&raw[0..8],0x20);
        let ext = super::unpack_name(&raw[8..11],0x20);
        match (raw[11] & VOLUME_ID > 0,ext.len()) {
            (true,_) => [base,ext].concat(),
            (false,0) => base,
            _ => [base,".".to_string(),ext].concat()
        }
    }
    pub fn name_bytes<'a>(&self,raw: &'a [u8]) -> &'a [u8] {
        &raw[0..11]
    }
    pub fn get_attr(&self,raw: &[u8]) -> FileAttr {
        let native = raw[11];
        let mut common = super::BINARY;
        if native & DIRECTORY > 0 {
            common = super::DIRECTORY;
        }
        if native & VOLUME_ID > 0 {
            common = super::VOLUME;
        }
        if native & READ_ONLY > 0 {
            common |= super::READ_ONLY;
        }
        if native & HIDDEN > 0 {
            common |= super::HIDDEN;
        }
        if native & SYSTEM > 0 {
            common |= super::SYSTEM;
        }
        FileAttr {
            format: FormatKind::Fat12,
            common,
            origin: [native as u32,0,0]
        }
    }
    pub fn set_attr(&self,raw: &mut [u8],attr: &FileAttr) {
        if attr.format == FormatKind::Fat12 {
            raw[11] = attr.origin[0] as u8;
            return;
        }
        raw[11] = attr_bits(attr.common);
    }
    pub fn start_group(&self,raw: &[u8]) -> Option<u32> {
        if !self.check_used(raw,false) {
            return None;
        }
        let c = u16::from_le_bytes([raw[26],raw[27]]) as u32;
        match c {
            0 => None,
            _ => Some(c)
        }
    }
    pub fn groups(&self,store: &dyn SectorStore,alloc: &Fat12Alloc,raw: &[u8]) -> Result<GroupList,DYNERR> {
        match self.start_group(raw) {
            Some(g) => {
                let mut list = alloc.chain(store,g)?;
                let eof = u32::from_le_bytes([raw[28],raw[29],raw[30],raw[31]]) as usize;
                if eof > 0 && eof <= list.capacity() {
                    list.set_size(eof);
                }
                Ok(list)
            },
            None => Ok(GroupList::new(alloc.bytes_per_group()))
        }
    }
    /// FAT stores an authoritative byte count
    pub fn file_size(&self,_store: &dyn SectorStore,_alloc: &Fat12Alloc,raw: &[u8],_list: &GroupList) -> usize {
        u32::from_le_bytes([raw[28],raw[29],raw[30],raw[31]]) as usize
    }
    pub fn set_file_size(&self,raw: &mut [u8],size: usize) {
        raw[28..32].copy_from_slice(&u32::to_le_bytes(size as u32));
    }
    pub fn set_start_group(&self,raw: &mut [u8],group: u32) {
        raw[26..28].copy_from_slice(&u16::to_le_bytes(group as u16));
    }
    pub fn create(&self,attr: &DirItemAttr,start: u32) -> Result<Vec<u8>,DYNERR> {
        if !is_name_valid(&attr.name) && attr.name != "." && attr.name != ".." {
            return Err(Box::new(Error::BadName));
        }
        let mut entry = Entry::new();
        let (base,ext) = match attr.name.split_once('.') {
            Some((b,x)) if attr.name != "." && attr.name != ".." => (b.to_string(),x.to_string()),
            _ => (attr.name.clone(),String::new())
        };
        entry.name.copy_from_slice(&super::pack_name(&base.to_uppercase(),8,0x20));
        entry.ext.copy_from_slice(&super::pack_name(&ext.to_uppercase(),3,0x20));
        if !attr.ignore_date {
            let date = pack_date(attr.datetime);
            let time = pack_time(attr.datetime);
            entry.creation_date = date;
            entry.creation_time = time;
            entry.access_date = date;
            entry.write_date = date;
            entry.write_time = time;
        }
        entry.cluster_low = u16::to_le_bytes(start as u16);
        let mut raw = entry.to_bytes();
        if !attr.ignore_type {
            raw[11] = match attr.native_type {
                Some(t) => t as u8,
                None => attr_bits(attr.common)
            };
        }
        Ok(raw)
    }
    pub fn rename(&self,raw: &mut [u8],name: &str) -> STDRESULT {
        if !is_name_valid(name) {
            return Err(Box::new(Error::BadName));
        }
        let probe = self.create(&DirItemAttr::named(name),0)?;
        raw[0..11].copy_from_slice(&probe[0..11]);
        Ok(())
    }
    pub fn tombstone(&self,raw: &mut [u8]) {
        raw[0] = FREE;
    }
    pub fn has_date(&self) -> bool {
        true
    }
    pub fn get_date(&self,raw: &[u8]) -> Option<chrono::NaiveDateTime> {
        unpack_datetime([raw[24],raw[25]],[raw[22],raw[23]])
    }
    pub fn set_date(&self,raw: &mut [u8],dt: chrono::NaiveDateTime) {
        let date = pack_date(Some(dt));
        let time = pack_time(Some(dt));
        raw[22..24].copy_from_slice(&time);
        raw[24..26].copy_from_slice(&date);
    }
    pub fn has_addresses(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn twelve_bit_packing() {
        let mut buf = vec![0;512];
        set_cluster(2,0xabc,&mut buf);
        set_cluster(3,0x123,&mut buf);
        assert_eq!(get_cluster(2,&buf),0xabc);
        assert_eq!(get_cluster(3,&buf),0x123);
        // the shared middle byte holds the low nibble of one and high of the other
        assert_eq!(buf[3..6],[0xbc,0x3a,0x12]);
    }
    #[test]
    fn date_round_trip() {
        let dt = chrono::NaiveDate::from_ymd_opt(1987,6,15).unwrap().and_hms_opt(13,45,22).unwrap();
        let date = pack_date(Some(dt));
        let time = pack_time(Some(dt));
        let back = unpack_datetime(date,time).expect("bad datetime");
        assert_eq!(back.date(),dt.date());
        assert_eq!(back.time().hour(),13);
        assert_eq!(back.time().minute(),45);
        assert_eq!(back.time().second(),22);
    }
    #[test]
    fn names() {
        assert!(is_name_valid("AUTOEXEC.BAT"));
        assert!(is_name_valid("a.b"));
        assert!(!is_name_valid("TOOLONGNAME.BAT"));
        assert!(!is_name_valid("BAD?.TXT"));
        assert!(!is_name_valid("A.B.C"));
    }
}
