//! ### Amiga OFS and FFS file systems
//!
//! Everything is a 512 byte block of 128 big-endian longwords.  The root
//! block sits in the middle of the disk and holds a 72 bucket hash table;
//! each bucket chains header blocks through their hash-chain longword.
//! A header block is simultaneously the directory entry and the file's
//! index: up to 72 data block pointers filled from the high end, with
//! extension blocks continuing larger files.
//!
//! Every metadata block carries a checksum longword chosen so the block's
//! longwords sum to zero.  The bitmap block marks free blocks with a set
//! bit and is checksummed the same way.
//!
//! OFS data blocks have their own 24 byte header and carry 488 data
//! bytes; FFS data blocks are raw.

use log::{trace,debug};
use crate::store::SectorStore;
use crate::chs::Translator;
use crate::{DYNERR,STDRESULT};
use super::{Error,FormatKind,FileAttr,GroupRef,GroupList,UnitState,DirItemAttr,DirLayout};

pub const BLOCK_SIZE: usize = 512;
pub const LONGS: usize = BLOCK_SIZE/4;
pub const TABLE_SIZE: usize = 72;
pub const NAME_MAX: usize = 30;
pub const OFS_DATA_SKIP: usize = 24;
pub const OFS_DATA_PER_BLOCK: usize = BLOCK_SIZE - OFS_DATA_SKIP;

// block types
pub const T_HEADER: u32 = 2;
pub const T_DATA: u32 = 8;
pub const T_LIST: u32 = 16;
// secondary types
pub const ST_ROOT: u32 = 1;
pub const ST_USERDIR: u32 = 2;
pub const ST_FILE: u32 = 0xffff_fffd;

// longword offsets from the front
const OFF_TYPE: usize = 0;
const OFF_HEADER_KEY: usize = 1;
const OFF_HIGH_SEQ: usize = 2;
const OFF_HT_SIZE: usize = 3;
const OFF_FIRST_DATA: usize = 4;
const OFF_CHKSUM: usize = 5;
const OFF_TABLE: usize = 6;
// longword offsets from the back, as absolute indices
const OFF_BM_FLAG: usize = LONGS-50;
const OFF_BM_PAGE: usize = LONGS-49;
const OFF_PROTECT: usize = LONGS-48;
const OFF_BYTE_SIZE: usize = LONGS-47;
const OFF_DAYS: usize = LONGS-23;
const OFF_MINS: usize = LONGS-22;
const OFF_TICKS: usize = LONGS-21;
const OFF_HASH_CHAIN: usize = LONGS-4;
const OFF_EXTENSION: usize = LONGS-3;
const OFF_PARENT: usize = LONGS-2;
const OFF_SEC_TYPE: usize = LONGS-1;
/// byte offset of the length-prefixed name
const NAME_OFFSET: usize = BLOCK_SIZE-80;

// protection bits deny when set
pub const PROTECT_DELETE: u32 = 1;
pub const PROTECT_EXECUTE: u32 = 2;
pub const PROTECT_WRITE: u32 = 4;
pub const PROTECT_READ: u32 = 8;

pub fn get_long(buf: &[u8],idx: usize) -> u32 {
    u32::from_be_bytes([buf[4*idx],buf[4*idx+1],buf[4*idx+2],buf[4*idx+3]])
}

pub fn set_long(buf: &mut [u8],idx: usize,val: u32) {
    buf[4*idx..4*idx+4].copy_from_slice(&u32::to_be_bytes(val));
}

/// Compute the value that makes the block's longwords sum to zero.
pub fn checksum(buf: &[u8],chk_idx: usize) -> u32 {
    let mut sum: u32 = 0;
    for i in 0..buf.len()/4 {
        if i != chk_idx {
            sum = sum.wrapping_add(get_long(buf,i));
        }
    }
    0u32.wrapping_sub(sum)
}

pub fn apply_checksum(buf: &mut [u8],chk_idx: usize) {
    let val = checksum(buf,chk_idx);
    set_long(buf,chk_idx,val);
}

pub fn verify_checksum(buf: &[u8],chk_idx: usize) -> bool {
    let mut sum: u32 = 0;
    for i in 0..buf.len()/4 {
        sum = sum.wrapping_add(get_long(buf,i));
    }
    sum == 0 && chk_idx < buf.len()/4
}

/// Case-folding name hash over the 72 buckets.
pub fn hash_name(name: &str) -> usize {
    let up = name.to_uppercase();
    let mut h = up.len() as u32;
    for c in up.bytes() {
        h = (h.wrapping_mul(13).wrapping_add(c as u32)) & 0x7ff;
    }
    h as usize % TABLE_SIZE
}

fn read_bcpl_name(buf: &[u8]) -> String {
    let len = usize::min(buf[NAME_OFFSET] as usize,NAME_MAX);
    let mut ans = String::new();
    for b in &buf[NAME_OFFSET+1..NAME_OFFSET+1+len] {
        ans.push(match *b {
            x if x >= 0x20 && x < 0x7f => x as char,
            _ => '?'
        });
    }
    ans
}

fn write_bcpl_name(buf: &mut [u8],name: &str) {
    buf[NAME_OFFSET] = name.len() as u8;
    for (i,b) in name.bytes().enumerate() {
        buf[NAME_OFFSET+1+i] = b;
    }
}

/// days/mins/ticks since 1978-01-01
fn pack_datetime(time: Option<chrono::NaiveDateTime>) -> (u32,u32,u32) {
    let now = match time {
        Some(t) => t,
        None => chrono::Local::now().naive_local()
    };
    let epoch = chrono::NaiveDate::from_ymd_opt(1978,1,1).unwrap().and_hms_opt(0,0,0).unwrap();
    let delta = now - epoch;
    let days = i64::max(delta.num_days(),0);
    let rem = delta - chrono::Duration::days(days);
    let mins = rem.num_minutes();
    let ticks = (rem.num_seconds() - mins*60)*50;
    (days as u32,mins as u32,ticks as u32)
}

fn unpack_datetime(days: u32,mins: u32,ticks: u32) -> Option<chrono::NaiveDateTime> {
    let epoch = chrono::NaiveDate::from_ymd_opt(1978,1,1)?.and_hms_opt(0,0,0)?;
    Some(epoch + chrono::Duration::days(days as i64)
        + chrono::Duration::minutes(mins as i64)
        + chrono::Duration::seconds(ticks as i64/50))
}

/// Allocation strategy over the root's bitmap block.
pub struct AmigaAlloc {
    xlat: Translator,
    kind: FormatKind,
    root_block: u32
}

impl AmigaAlloc {
    pub fn open(xlat: Translator,kind: FormatKind) -> Self {
        let root_block = (xlat.positions()/2) as u32;
        Self {
            xlat,
            kind,
            root_block
        }
    }
    pub fn xlat(&self) -> &Translator {
        &self.xlat
    }
    pub fn kind(&self) -> FormatKind {
        self.kind
    }
    pub fn is_ffs(&self) -> bool {
        self.kind == FormatKind::AmigaFfs
    }
    pub fn root_block(&self) -> u32 {
        self.root_block
    }
    pub fn end_group(&self) -> u32 {
        self.xlat.positions() as u32
    }
    pub fn bytes_per_group(&self) -> usize {
        match self.is_ffs() {
            true => BLOCK_SIZE,
            false => OFS_DATA_PER_BLOCK
        }
    }
    pub fn data_skip(&self) -> usize {
        match self.is_ffs() {
            true => 0,
            false => OFS_DATA_SKIP
        }
    }
    pub fn group_ref(&self,group: u32) -> Result<GroupRef,DYNERR> {
        if group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        let (track,side,sec) = self.xlat.store_coords(group as usize)?;
        Ok(GroupRef::simple(group,track,side,sec))
    }
    pub fn read_block(&self,store: &dyn SectorStore,block: u32) -> Result<Vec<u8>,DYNERR> {
        let r = self.group_ref(block)?;
        store.read_sector(r.track,r.side,r.sector_start)
    }
    pub fn write_block(&self,store: &mut dyn SectorStore,block: u32,buf: &[u8]) -> STDRESULT {
        let r = self.group_ref(block)?;
        store.write_sector(r.track,r.side,r.sector_start,buf)
    }
    fn bitmap_block(&self,store: &dyn SectorStore) -> Result<u32,DYNERR> {
        let root = self.read_block(store,self.root_block)?;
        let bm = get_long(&root,OFF_BM_PAGE);
        if bm == 0 || bm >= self.end_group() {
            return Err(Box::new(Error::Structural));
        }
        Ok(bm)
    }
    /// blocks 0 and 1 are outside the bitmap
    fn bit_coords(block: u32) -> (usize,u32) {
        let idx = block as usize - 2;
        (1 + idx/32,1 << (idx % 32))
    }
    pub fn is_group_used(&self,store: &dyn SectorStore,group: u32) -> Result<bool,DYNERR> {
        if group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        if group < 2 {
            return Ok(true);
        }
        let bm = self.read_block(store,self.bitmap_block(store)?)?;
        let (idx,mask) = Self::bit_coords(group);
        // a set bit means free
        Ok(get_long(&bm,idx) & mask == 0)
    }
    pub fn group_value(&self,store: &dyn SectorStore,group: u32) -> Result<u32,DYNERR> {
        Ok(match self.is_group_used(store,group)? {
            true => 1,
            false => 0
        })
    }
    pub fn set_group_value(&self,store: &mut dyn SectorStore,group: u32,val: u32) -> STDRESULT {
        if group < 2 || group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        let bm_block = self.bitmap_block(store)?;
        let mut bm = self.read_block(store,bm_block)?;
        let (idx,mask) = Self::bit_coords(group);
        let long = match val {
            0 => get_long(&bm,idx) | mask,
            _ => get_long(&bm,idx) & !mask
        };
        set_long(&mut bm,idx,long);
        apply_checksum(&mut bm,0);
        self.write_block(store,bm_block,&bm)
    }
    /// Ascending search from just past the root, wrapping to block 2.
    pub fn next_empty_group(&self,store: &dyn SectorStore,prev: Option<u32>) -> Result<Option<u32>,DYNERR> {
        let bm = self.read_block(store,self.bitmap_block(store)?)?;
        let start = match prev {
            Some(p) => p+1,
            None => self.root_block+1
        };
        let wrap = (start..self.end_group()).chain(2..start.min(self.end_group()));
        for g in wrap {
            let (idx,mask) = Self::bit_coords(g);
            if get_long(&bm,idx) & mask > 0 {
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
                    debug!("no space for block {} of {}",i+1,needed);
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
        trace!("allocated {} blocks",list.count());
        Ok(list)
    }
    pub fn delete_groups(&self,store: &mut dyn SectorStore,list: &GroupList) -> STDRESULT {
        for g in list.iter() {
            self.set_group_value(store,g.group,0)?;
        }
        Ok(())
    }
    pub fn disk_free_map(&self,store: &dyn SectorStore) -> Result<Vec<UnitState>,DYNERR> {
        let bm_block = self.bitmap_block(store)?;
        let bm = self.read_block(store,bm_block)?;
        let mut ans = vec![UnitState::System,UnitState::System];
        for g in 2..self.end_group() {
            let (idx,mask) = Self::bit_coords(g);
            ans.push(match (get_long(&bm,idx) & mask > 0,g == self.root_block || g == bm_block) {
                (_,true) => UnitState::System,
                (true,false) => UnitState::Free,
                (false,false) => UnitState::Used
            });
        }
        Ok(ans)
    }
    pub fn check_consistency(&self,store: &dyn SectorStore,formatting: bool) -> f64 {
        if formatting {
            return 0.0;
        }
        let root = match self.read_block(store,self.root_block) {
            Ok(b) => b,
            Err(_) => return -1.0
        };
        if get_long(&root,OFF_TYPE) != T_HEADER || get_long(&root,OFF_SEC_TYPE) != ST_ROOT {
            return -1.0;
        }
        if get_long(&root,OFF_HT_SIZE) as usize != TABLE_SIZE {
            return -1.0;
        }
        if !verify_checksum(&root,OFF_CHKSUM) {
            debug!("root block checksum bad");
            return -1.0;
        }
        let mut score = 0.75;
        if get_long(&root,OFF_BM_FLAG) == 0xffff_ffff {
            score += 0.25;
        }
        // boot block distinguishes OFS from FFS
        if let Ok(boot) = self.read_block(store,0) {
            if &boot[0..3] == b"DOS" {
                let ffs = boot[3] & 1 > 0;
                if ffs != self.is_ffs() {
                    score -= 0.5;
                }
            }
        }
        score
    }
    pub fn parse_geometry(&mut self,store: &dyn SectorStore,formatting: bool) -> f64 {
        if formatting {
            return 1.0;
        }
        if store.track_count() != self.xlat.track_count() {
            debug!("declared geometry disagrees with the image");
            return -1.0;
        }
        1.0
    }
    /// The root header block.
    pub fn root_groups(&self,_store: &dyn SectorStore) -> Result<GroupList,DYNERR> {
        let mut list = GroupList::new(BLOCK_SIZE);
        list.push(self.group_ref(self.root_block)?);
        list.set_size(BLOCK_SIZE);
        Ok(list)
    }
    pub fn volume_name(&self,store: &dyn SectorStore) -> Result<String,DYNERR> {
        let root = self.read_block(store,self.root_block())?;
        Ok(read_bcpl_name(&root))
    }
    pub fn set_volume_name(&self,store: &mut dyn SectorStore,name: &str) -> STDRESULT {
        if name.is_empty() || name.len() > NAME_MAX || !name.is_ascii() {
            return Err(Box::new(Error::BadName));
        }
        let mut root = self.read_block(store,self.root_block())?;
        for b in &mut root[NAME_OFFSET..NAME_OFFSET+1+NAME_MAX] {
            *b = 0;
        }
        write_bcpl_name(&mut root,name);
        apply_checksum(&mut root,OFF_CHKSUM);
        self.write_block(store,self.root_block(),&root)
    }
    pub fn format_disk(&self,store: &mut dyn SectorStore,name: &str) -> STDRESULT {
        if name.is_empty() || name.len() > NAME_MAX {
            return Err(Box::new(Error::BadName));
        }
        let mut boot = vec![0;BLOCK_SIZE];
        boot[0..3].copy_from_slice(b"DOS");
        boot[3] = match self.is_ffs() {
            true => 1,
            false => 0
        };
        self.write_block(store,0,&boot)?;
        let bm_block = self.root_block + 1;
        let mut root = vec![0;BLOCK_SIZE];
        set_long(&mut root,OFF_TYPE,T_HEADER);
        set_long(&mut root,OFF_HT_SIZE,TABLE_SIZE as u32);
        set_long(&mut root,OFF_BM_FLAG,0xffff_ffff);
        set_long(&mut root,OFF_BM_PAGE,bm_block);
        write_bcpl_name(&mut root,name);
        let (days,mins,ticks) = pack_datetime(None);
        set_long(&mut root,OFF_DAYS,days);
        set_long(&mut root,OFF_MINS,mins);
        set_long(&mut root,OFF_TICKS,ticks);
        set_long(&mut root,OFF_SEC_TYPE,ST_ROOT);
        apply_checksum(&mut root,OFF_CHKSUM);
        self.write_block(store,self.root_block,&root)?;
        let mut bm = vec![0xff;BLOCK_SIZE];
        // clear the pad bits beyond the last block
        let total = self.end_group() as usize - 2;
        for idx in total..(LONGS-1)*32 {
            let long = get_long(&bm,1+idx/32) & !(1 << (idx % 32));
            set_long(&mut bm,1+idx/32,long);
        }
        apply_checksum(&mut bm,0);
        self.write_block(store,bm_block,&bm)?;
        self.set_group_value(store,self.root_block,1)?;
        self.set_group_value(store,bm_block,1)
    }
}

/// Directory entry codec.  The raw entry is the 512 byte header block;
/// enumeration walks the parent's hash table and chains.
pub struct AmigaEntries {
    kind: FormatKind
}

impl AmigaEntries {
    pub fn new(kind: FormatKind) -> Self {
        Self {
            kind
        }
    }
    pub fn layout(&self) -> DirLayout {
        DirLayout::Native
    }
    /// header blocks reachable from a directory block, bucket by bucket
    pub fn enumerate(&self,store: &dyn SectorStore,alloc: &AmigaAlloc,dir_block: u32) -> Result<Vec<u32>,DYNERR> {
        let dir = alloc.read_block(store,dir_block)?;
        let mut ans = Vec::new();
        for bucket in 0..TABLE_SIZE {
            let mut next = get_long(&dir,OFF_TABLE+bucket);
            for _rep in 0..alloc.end_group() {
                if next == 0 {
                    break;
                }
                if next >= alloc.end_group() {
                    return Err(Box::new(Error::Structural));
                }
                ans.push(next);
                let hdr = alloc.read_block(store,next)?;
                next = get_long(&hdr,OFF_HASH_CHAIN);
            }
        }
        Ok(ans)
    }
    pub fn check(&self,raw: &[u8],_last: &mut bool) -> bool {
        if raw.len() < BLOCK_SIZE {
            return false;
        }
        if get_long(raw,OFF_TYPE) != T_HEADER {
            return false;
        }
        let st = get_long(raw,OFF_SEC_TYPE);
        if st != ST_USERDIR && st != ST_FILE {
            return false;
        }
        verify_checksum(raw,OFF_CHKSUM)
    }
    /// chained headers have no separate used flag
    pub fn check_used(&self,_raw: &[u8],_unuse_hint: bool) -> bool {
        true
    }
    pub fn name(&self,raw: &[u8]) -> String {
        read_bcpl_name(raw)
    }
    pub fn name_bytes<'a>(&self,raw: &'a [u8]) -> &'a [u8] {
        let len = usize::min(raw[NAME_OFFSET] as usize,NAME_MAX);
        &raw[NAME_OFFSET+1..NAME_OFFSET+1+len]
    }
    pub fn is_directory(&self,raw: &[u8]) -> bool {
        get_long(raw,OFF_SEC_TYPE) == ST_USERDIR
    }
    pub fn get_attr(&self,raw: &[u8]) -> FileAttr {
        let protect = get_long(raw,OFF_PROTECT);
        let mut common = super::BINARY;
        if self.is_directory(raw) {
            common = super::DIRECTORY;
        }
        if protect & PROTECT_WRITE > 0 {
            common |= super::READ_ONLY;
        }
        FileAttr {
            format: self.kind,
            common,
            origin: [protect,get_long(raw,OFF_SEC_TYPE),0]
        }
    }
    pub fn set_attr(&self,raw: &mut [u8],attr: &FileAttr) {
        let protect = match attr.format == self.kind {
            true => attr.origin[0],
            false => match attr.common & super::READ_ONLY > 0 {
                true => PROTECT_WRITE | PROTECT_DELETE,
                false => 0
            }
        };
        set_long(raw,OFF_PROTECT,protect);
        apply_checksum(raw,OFF_CHKSUM);
    }
    pub fn start_group(&self,raw: &[u8]) -> Option<u32> {
        match get_long(raw,OFF_HEADER_KEY) {
            0 => None,
            b => Some(b)
        }
    }
    /// Data blocks from the header's pointer table and extension chain.
    pub fn groups(&self,store: &dyn SectorStore,alloc: &AmigaAlloc,raw: &[u8]) -> Result<GroupList,DYNERR> {
        let mut list = GroupList::new(alloc.bytes_per_group());
        if self.is_directory(raw) {
            return Ok(list);
        }
        let mut block = raw.to_vec();
        for _rep in 0..alloc.end_group() {
            let n = get_long(&block,OFF_HIGH_SEQ) as usize;
            if n > TABLE_SIZE {
                return Err(Box::new(Error::Structural));
            }
            for k in 0..n {
                let ptr = get_long(&block,OFF_TABLE+TABLE_SIZE-1-k);
                if ptr == 0 || ptr >= alloc.end_group() {
                    return Err(Box::new(Error::Structural));
                }
                list.push(alloc.group_ref(ptr)?);
            }
            match get_long(&block,OFF_EXTENSION) {
                0 => {
                    let size = get_long(raw,OFF_BYTE_SIZE) as usize;
                    list.set_size(usize::min(size,list.capacity()));
                    return Ok(list);
                },
                ext if ext < alloc.end_group() => {
                    block = alloc.read_block(store,ext)?;
                },
                _ => return Err(Box::new(Error::Structural))
            };
        }
        Err(Box::new(Error::ChainLimit))
    }
    /// header and extension blocks, for freeing
    pub fn index_groups(&self,store: &dyn SectorStore,alloc: &AmigaAlloc,raw: &[u8]) -> Result<GroupList,DYNERR> {
        let mut list = GroupList::new(BLOCK_SIZE);
        let own = get_long(raw,OFF_HEADER_KEY);
        list.push(alloc.group_ref(own)?);
        let mut ext = get_long(raw,OFF_EXTENSION);
        for _rep in 0..alloc.end_group() {
            if ext == 0 {
                list.set_size(list.capacity());
                return Ok(list);
            }
            if ext >= alloc.end_group() {
                return Err(Box::new(Error::Structural));
            }
            list.push(alloc.group_ref(ext)?);
            let buf = alloc.read_block(store,ext)?;
            ext = get_long(&buf,OFF_EXTENSION);
        }
        Err(Box::new(Error::ChainLimit))
    }
    pub fn file_size(&self,_store: &dyn SectorStore,_alloc: &AmigaAlloc,raw: &[u8],_list: &GroupList) -> usize {
        get_long(raw,OFF_BYTE_SIZE) as usize
    }
    /// Write a complete header (and extension) chain for a file or
    /// sub-directory and link it into the parent's hash table at the
    /// bucket head.  Data block headers are filled for OFS.  Returns the
    /// header block number.
    pub fn write_header(&self,store: &mut dyn SectorStore,alloc: &AmigaAlloc,parent_block: u32,
                        attr: &DirItemAttr,data: &GroupList,is_dir: bool) -> Result<u32,DYNERR> {
        if attr.name.is_empty() || attr.name.len() > NAME_MAX || !attr.name.is_ascii() || attr.name.contains(['/',':']) {
            return Err(Box::new(Error::BadName));
        }
        let ext_count = match data.count() {
            n if n > TABLE_SIZE => (n - TABLE_SIZE + TABLE_SIZE - 1) / TABLE_SIZE,
            _ => 0
        };
        let index = alloc.allocate_groups(store,(1+ext_count)*alloc.bytes_per_group(),None)?;
        let header_block = index.first().unwrap().group;
        // parent bucket head becomes our chain link
        let mut parent = alloc.read_block(store,parent_block)?;
        let bucket = hash_name(&attr.name);
        let old_head = get_long(&parent,OFF_TABLE+bucket);
        let mut chunks: Vec<&[GroupRef]> = Vec::new();
        let all: Vec<GroupRef> = data.iter().copied().collect();
        chunks.push(&all[0..usize::min(TABLE_SIZE,all.len())]);
        let mut at = TABLE_SIZE;
        while at < all.len() {
            chunks.push(&all[at..usize::min(at+TABLE_SIZE,all.len())]);
            at += TABLE_SIZE;
        }
        for (i,chunk) in chunks.iter().enumerate() {
            let own = index.get(i).unwrap().group;
            let mut buf = vec![0;BLOCK_SIZE];
            set_long(&mut buf,OFF_TYPE,match i {
                0 => T_HEADER,
                _ => T_LIST
            });
            set_long(&mut buf,OFF_HEADER_KEY,own);
            if !is_dir {
                set_long(&mut buf,OFF_HIGH_SEQ,chunk.len() as u32);
                for (k,r) in chunk.iter().enumerate() {
                    set_long(&mut buf,OFF_TABLE+TABLE_SIZE-1-k,r.group);
                }
                if i == 0 && !chunk.is_empty() {
                    set_long(&mut buf,OFF_FIRST_DATA,chunk[0].group);
                }
            }
            if i == 0 {
                set_long(&mut buf,OFF_BYTE_SIZE,data.size() as u32);
                set_long(&mut buf,OFF_HASH_CHAIN,old_head);
                write_bcpl_name(&mut buf,&attr.name);
                let (days,mins,ticks) = pack_datetime(attr.datetime);
                set_long(&mut buf,OFF_DAYS,days);
                set_long(&mut buf,OFF_MINS,mins);
                set_long(&mut buf,OFF_TICKS,ticks);
            }
            set_long(&mut buf,OFF_EXTENSION,match index.get(i+1) {
                Some(r) => r.group,
                None => 0
            });
            set_long(&mut buf,OFF_PARENT,parent_block);
            set_long(&mut buf,OFF_SEC_TYPE,match is_dir {
                true => ST_USERDIR,
                false => ST_FILE
            });
            apply_checksum(&mut buf,OFF_CHKSUM);
            alloc.write_block(store,own,&buf)?;
        }
        // OFS data block headers
        if !alloc.is_ffs() && !is_dir {
            let mut remaining = data.size();
            for (i,r) in data.iter().enumerate() {
                let mut buf = store.read_sector(r.track,r.side,r.sector_start)?;
                set_long(&mut buf,0,T_DATA);
                set_long(&mut buf,1,header_block);
                set_long(&mut buf,2,(i+1) as u32);
                set_long(&mut buf,3,usize::min(remaining,OFS_DATA_PER_BLOCK) as u32);
                set_long(&mut buf,4,match data.get(i+1) {
                    Some(n) => n.group,
                    None => 0
                });
                apply_checksum(&mut buf,5);
                store.write_sector(r.track,r.side,r.sector_start,&buf)?;
                remaining = remaining.saturating_sub(OFS_DATA_PER_BLOCK);
            }
        }
        set_long(&mut parent,OFF_TABLE+bucket,header_block);
        apply_checksum(&mut parent,OFF_CHKSUM);
        alloc.write_block(store,parent_block,&parent)?;
        trace!("linked {} into bucket {}",attr.name,bucket);
        Ok(header_block)
    }
    /// look up a name in a directory block
    pub fn lookup(&self,store: &dyn SectorStore,alloc: &AmigaAlloc,dir_block: u32,name: &str) -> Result<Option<u32>,DYNERR> {
        let dir = alloc.read_block(store,dir_block)?;
        let mut next = get_long(&dir,OFF_TABLE+hash_name(name));
        for _rep in 0..alloc.end_group() {
            if next == 0 {
                return Ok(None);
            }
            let hdr = alloc.read_block(store,next)?;
            if read_bcpl_name(&hdr).eq_ignore_ascii_case(name) {
                return Ok(Some(next));
            }
            next = get_long(&hdr,OFF_HASH_CHAIN);
        }
        Err(Box::new(Error::ChainLimit))
    }
    /// Unlink a header from its parent's bucket chain, re-checksumming
    /// whichever block carried the link.
    pub fn unlink(&self,store: &mut dyn SectorStore,alloc: &AmigaAlloc,parent_block: u32,target: u32) -> STDRESULT {
        let mut parent = alloc.read_block(store,parent_block)?;
        let hdr = alloc.read_block(store,target)?;
        let bucket = hash_name(&read_bcpl_name(&hdr));
        let after = get_long(&hdr,OFF_HASH_CHAIN);
        let mut prev = get_long(&parent,OFF_TABLE+bucket);
        if prev == target {
            set_long(&mut parent,OFF_TABLE+bucket,after);
            apply_checksum(&mut parent,OFF_CHKSUM);
            return alloc.write_block(store,parent_block,&parent);
        }
        for _rep in 0..alloc.end_group() {
            if prev == 0 {
                return Err(Box::new(Error::FileNotFound));
            }
            let mut buf = alloc.read_block(store,prev)?;
            if get_long(&buf,OFF_HASH_CHAIN) == target {
                set_long(&mut buf,OFF_HASH_CHAIN,after);
                apply_checksum(&mut buf,OFF_CHKSUM);
                return alloc.write_block(store,prev,&buf);
            }
            prev = get_long(&buf,OFF_HASH_CHAIN);
        }
        Err(Box::new(Error::ChainLimit))
    }
    pub fn is_empty_directory(&self,raw: &[u8]) -> bool {
        (0..TABLE_SIZE).all(|b| get_long(raw,OFF_TABLE+b) == 0)
    }
    pub fn create(&self,attr: &DirItemAttr,_start: u32) -> Result<Vec<u8>,DYNERR> {
        // headers are written in place by write_header; this probe form
        // only validates the name
        if attr.name.is_empty() || attr.name.len() > NAME_MAX || !attr.name.is_ascii() || attr.name.contains(['/',':']) {
            return Err(Box::new(Error::BadName));
        }
        let mut raw = vec![0;BLOCK_SIZE];
        set_long(&mut raw,OFF_TYPE,T_HEADER);
        set_long(&mut raw,OFF_SEC_TYPE,ST_FILE);
        write_bcpl_name(&mut raw,&attr.name);
        apply_checksum(&mut raw,OFF_CHKSUM);
        Ok(raw)
    }
    pub fn rename(&self,raw: &mut [u8],name: &str) -> STDRESULT {
        if name.is_empty() || name.len() > NAME_MAX || !name.is_ascii() || name.contains(['/',':']) {
            return Err(Box::new(Error::BadName));
        }
        // the caller must relink the bucket chain when the hash moves
        raw[NAME_OFFSET..NAME_OFFSET+NAME_MAX+1].fill(0);
        write_bcpl_name(raw,name);
        apply_checksum(raw,OFF_CHKSUM);
        Ok(())
    }
    /// Rename a linked header, moving it to the head of its new bucket.
    pub fn rename_in_dir(&self,store: &mut dyn SectorStore,alloc: &AmigaAlloc,parent_block: u32,
                         target: u32,new_name: &str) -> STDRESULT {
        if self.lookup(store,alloc,parent_block,new_name)?.is_some() {
            return Err(Box::new(Error::DuplicateFile));
        }
        self.unlink(store,alloc,parent_block,target)?;
        let mut hdr = alloc.read_block(store,target)?;
        self.rename(&mut hdr,new_name)?;
        let mut parent = alloc.read_block(store,parent_block)?;
        let bucket = hash_name(new_name);
        set_long(&mut hdr,OFF_HASH_CHAIN,get_long(&parent,OFF_TABLE+bucket));
        apply_checksum(&mut hdr,OFF_CHKSUM);
        alloc.write_block(store,target,&hdr)?;
        set_long(&mut parent,OFF_TABLE+bucket,target);
        apply_checksum(&mut parent,OFF_CHKSUM);
        alloc.write_block(store,parent_block,&parent)
    }
    pub fn tombstone(&self,_raw: &mut [u8]) {
        // unlink is the delete operation for chained headers
    }
    pub fn has_date(&self) -> bool {
        true
    }
    pub fn get_date(&self,raw: &[u8]) -> Option<chrono::NaiveDateTime> {
        unpack_datetime(get_long(raw,OFF_DAYS),get_long(raw,OFF_MINS),get_long(raw,OFF_TICKS))
    }
    pub fn set_date(&self,raw: &mut [u8],dt: chrono::NaiveDateTime) {
        let (days,mins,ticks) = pack_datetime(Some(dt));
        set_long(raw,OFF_DAYS,days);
        set_long(raw,OFF_MINS,mins);
        set_long(raw,OFF_TICKS,ticks);
        apply_checksum(raw,OFF_CHKSUM);
    }
    pub fn has_addresses(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::templates;

    fn setup(kind: FormatKind) -> (crate::store::MemStore,AmigaAlloc) {
        let t = templates::template(kind);
        let mut store = t.blank_store();
        let alloc = AmigaAlloc::open(t.translator().expect("bad translator"),kind);
        alloc.format_disk(&mut store,"Workbench").expect("format failed");
        (store,alloc)
    }
    fn colliding_names() -> (String,String) {
        // probe for two short names in the same bucket
        let a = "aaa".to_string();
        for i in 0..1000 {
            let b = format!("f{}",i);
            if hash_name(&a) == hash_name(&b) {
                return (a,b);
            }
        }
        panic!("no collision found");
    }
    #[test]
    fn checksums_sum_to_zero() {
        let mut buf = vec![0;BLOCK_SIZE];
        set_long(&mut buf,0,T_HEADER);
        set_long(&mut buf,77,0xdeadbeef);
        apply_checksum(&mut buf,OFF_CHKSUM);
        assert!(verify_checksum(&buf,OFF_CHKSUM));
        set_long(&mut buf,40,1);
        assert!(!verify_checksum(&buf,OFF_CHKSUM));
    }
    #[test]
    fn fresh_root_passes_checks() {
        let (store,alloc) = setup(FormatKind::AmigaOfs);
        assert!(alloc.check_consistency(&store,false) > 0.9);
        assert!(alloc.is_group_used(&store,alloc.root_block()).expect("range"));
        assert!(!alloc.is_group_used(&store,2).expect("range"));
    }
    #[test]
    fn write_and_read_back_file() {
        let (mut store,alloc) = setup(FormatKind::AmigaOfs);
        let codec = AmigaEntries::new(FormatKind::AmigaOfs);
        let data = alloc.allocate_groups(&mut store,1000,None).expect("allocation failed");
        let hdr = codec.write_header(&mut store,&alloc,alloc.root_block(),
            &DirItemAttr::named("startup-sequence"),&data,false).expect("write failed");
        let raw = alloc.read_block(&store,hdr).expect("io");
        assert!(codec.check(&raw,&mut false));
        assert_eq!(codec.name(&raw),"startup-sequence");
        let walked = codec.groups(&store,&alloc,&raw).expect("walk failed");
        assert_eq!(walked.count(),data.count());
        assert_eq!(codec.file_size(&store,&alloc,&raw,&walked),1000);
        // OFS data block headers are checksummed and sequenced
        let first = data.first().unwrap();
        let dbuf = store.read_sector(first.track,first.side,first.sector_start).expect("io");
        assert_eq!(get_long(&dbuf,0),T_DATA);
        assert_eq!(get_long(&dbuf,2),1);
        assert!(verify_checksum(&dbuf,5));
    }
    #[test]
    fn extension_block_for_many_data_blocks() {
        let (mut store,alloc) = setup(FormatKind::AmigaFfs);
        let codec = AmigaEntries::new(FormatKind::AmigaFfs);
        // 100 blocks exceeds the 72 header pointers
        let data = alloc.allocate_groups(&mut store,100*BLOCK_SIZE,None).expect("allocation failed");
        let hdr = codec.write_header(&mut store,&alloc,alloc.root_block(),
            &DirItemAttr::named("bigfile"),&data,false).expect("write failed");
        let raw = alloc.read_block(&store,hdr).expect("io");
        let index = codec.index_groups(&store,&alloc,&raw).expect("walk failed");
        assert_eq!(index.count(),2);
        let walked = codec.groups(&store,&alloc,&raw).expect("walk failed");
        assert_eq!(walked.count(),100);
    }
    #[test]
    fn hash_collision_chain_survives_delete() {
        let (mut store,alloc) = setup(FormatKind::AmigaOfs);
        let codec = AmigaEntries::new(FormatKind::AmigaOfs);
        let (name_a,name_b) = colliding_names();
        let data_a = alloc.allocate_groups(&mut store,100,None).expect("allocation failed");
        let hdr_a = codec.write_header(&mut store,&alloc,alloc.root_block(),
            &DirItemAttr::named(&name_a),&data_a,false).expect("write failed");
        let data_b = alloc.allocate_groups(&mut store,100,None).expect("allocation failed");
        let hdr_b = codec.write_header(&mut store,&alloc,alloc.root_block(),
            &DirItemAttr::named(&name_b),&data_b,false).expect("write failed");
        // both resolve by name while chained in one bucket
        assert_eq!(codec.lookup(&store,&alloc,alloc.root_block(),&name_a).expect("io"),Some(hdr_a));
        assert_eq!(codec.lookup(&store,&alloc,alloc.root_block(),&name_b).expect("io"),Some(hdr_b));
        // delete the second-inserted (bucket head) and the first survives
        codec.unlink(&mut store,&alloc,alloc.root_block(),hdr_b).expect("unlink failed");
        alloc.delete_groups(&mut store,&data_b).expect("delete failed");
        let raw = alloc.read_block(&store,hdr_b).expect("io");
        let idx = codec.index_groups(&store,&alloc,&raw).expect("walk");
        alloc.delete_groups(&mut store,&idx).expect("delete failed");
        assert_eq!(codec.lookup(&store,&alloc,alloc.root_block(),&name_b).expect("io"),None);
        assert_eq!(codec.lookup(&store,&alloc,alloc.root_block(),&name_a).expect("io"),Some(hdr_a));
        // the root block checksum stayed valid through the relink
        let root = alloc.read_block(&store,alloc.root_block()).expect("io");
        assert!(verify_checksum(&root,OFF_CHKSUM));
    }
    #[test]
    fn directory_header_and_emptiness() {
        let (mut store,alloc) = setup(FormatKind::AmigaOfs);
        let codec = AmigaEntries::new(FormatKind::AmigaOfs);
        let empty = GroupList::new(alloc.bytes_per_group());
        let hdr = codec.write_header(&mut store,&alloc,alloc.root_block(),
            &DirItemAttr::named("Devs"),&empty,true).expect("write failed");
        let raw = alloc.read_block(&store,hdr).expect("io");
        assert!(codec.is_directory(&raw));
        assert!(codec.is_empty_directory(&raw));
        let attr = codec.get_attr(&raw);
        assert!(attr.is_set(crate::fs::DIRECTORY));
    }
}
