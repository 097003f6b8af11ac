//! ### Macintosh HFS
//!
//! The Master Directory Block at sector 2 anchors everything: allocation
//! block size, volume bitmap location, and the catalog file's extents.
//! The catalog is a B-tree whose leaf records pair a (parent id, name)
//! key with a file or directory record; files carry up to three inline
//! extents.  All integers are big-endian and names are Pascal strings.
//!
//! The catalog here is kept at depth one: a header node and a single
//! leaf node.  Files needing more than three extents, or a leaf that
//! overflows 512 bytes, are refused rather than spilled into index or
//! overflow structures.

use log::{trace,debug};
use crate::store::SectorStore;
use crate::chs::Translator;
use crate::{DYNERR,STDRESULT};
use super::{Error,FormatKind,FileAttr,GroupRef,GroupList,UnitState,DirItemAttr,DirLayout};

pub const SECTOR_SIZE: usize = 512;
pub const NODE_SIZE: usize = 512;
pub const MDB_SECTOR: usize = 2;
pub const VBM_SECTOR: usize = 3;
pub const FIRST_ALLOC_SECTOR: usize = 4;
pub const CATALOG_BLOCKS: u16 = 12;
pub const NAME_MAX: usize = 31;
pub const ROOT_CNID: u32 = 2;
pub const FIRST_FILE_CNID: u32 = 16;

pub const SIG_MDB: u16 = 0x4244;
// node descriptor types
pub const NODE_HEADER: u8 = 1;
pub const NODE_LEAF: u8 = 0xff;
// catalog record types
pub const REC_DIR: u8 = 1;
pub const REC_FILE: u8 = 2;

pub const FILE_LOCKED: u8 = 0x01;

const FILE_REC_LEN: usize = 102;
const DIR_REC_LEN: usize = 70;
const NODE_DESC_LEN: usize = 14;

fn get_u16(buf: &[u8],off: usize) -> u16 {
    u16::from_be_bytes([buf[off],buf[off+1]])
}
fn get_u32(buf: &[u8],off: usize) -> u32 {
    u32::from_be_bytes([buf[off],buf[off+1],buf[off+2],buf[off+3]])
}
fn set_u16(buf: &mut [u8],off: usize,val: u16) {
    buf[off..off+2].copy_from_slice(&u16::to_be_bytes(val));
}
fn set_u32(buf: &mut [u8],off: usize,val: u32) {
    buf[off..off+4].copy_from_slice(&u32::to_be_bytes(val));
}

/// seconds since 1904-01-01
fn pack_date(time: Option<chrono::NaiveDateTime>) -> u32 {
    let now = match time {
        Some(t) => t,
        None => chrono::Local::now().naive_local()
    };
    let epoch = chrono::NaiveDate::from_ymd_opt(1904,1,1).unwrap().and_hms_opt(0,0,0).unwrap();
    i64::max((now-epoch).num_seconds(),0) as u32
}

fn unpack_date(secs: u32) -> Option<chrono::NaiveDateTime> {
    let epoch = chrono::NaiveDate::from_ymd_opt(1904,1,1)?.and_hms_opt(0,0,0)?;
    Some(epoch + chrono::Duration::seconds(secs as i64))
}

fn is_name_valid(name: &str) -> bool {
    !name.is_empty() && name.len() <= NAME_MAX && name.is_ascii() && !name.contains(':')
}

/// Master Directory Block fields we act on
pub struct Mdb {
    pub sig: u16,
    pub vbm_start: u16,
    pub num_al_blks: u16,
    pub al_blk_size: u32,
    pub al_bl_start: u16,
    pub next_cnid: u32,
    pub free_blks: u16,
    pub num_files: u16,
    pub num_dirs: u32,
    pub vol_name: String,
    /// catalog file extents, (start block, block count)
    pub cat_extents: [(u16,u16);3]
}

impl Mdb {
    pub fn from_sector(buf: &[u8]) -> Self {
        let name_len = usize::min(buf[36] as usize,27);
        let mut cat_extents = [(0,0);3];
        for i in 0..3 {
            cat_extents[i] = (get_u16(buf,150+4*i),get_u16(buf,152+4*i));
        }
        Self {
            sig: get_u16(buf,0),
            vbm_start: get_u16(buf,14),
            num_al_blks: get_u16(buf,18),
            al_blk_size: get_u32(buf,20),
            al_bl_start: get_u16(buf,28),
            next_cnid: get_u32(buf,30),
            free_blks: get_u16(buf,34),
            num_files: get_u16(buf,12),
            num_dirs: get_u32(buf,88),
            vol_name: super::unpack_name(&buf[37..37+name_len],0x00),
            cat_extents
        }
    }
    pub fn plausible(&self,total_sectors: usize) -> bool {
        self.sig == SIG_MDB
            && self.al_blk_size as usize % SECTOR_SIZE == 0
            && self.al_blk_size > 0
            && self.vbm_start as usize >= 3
            && (self.al_bl_start as usize) < total_sectors
            && self.num_al_blks > 0
            && self.free_blks <= self.num_al_blks
            && self.cat_extents[0].1 > 0
    }
}

/// Allocation strategy over the volume bitmap, one allocation block per
/// 512 byte sector at the canonical geometry.
pub struct HfsAlloc {
    xlat: Translator
}

impl HfsAlloc {
    pub fn open(xlat: Translator) -> Self {
        Self {
            xlat
        }
    }
    pub fn xlat(&self) -> &Translator {
        &self.xlat
    }
    fn sector_ref(&self,sector: usize) -> Result<(usize,usize,usize),DYNERR> {
        Ok(self.xlat.store_coords(sector)?)
    }
    pub fn read_sector(&self,store: &dyn SectorStore,sector: usize) -> Result<Vec<u8>,DYNERR> {
        let (t,s,sec) = self.sector_ref(sector)?;
        store.read_sector(t,s,sec)
    }
    pub fn write_sector(&self,store: &mut dyn SectorStore,sector: usize,buf: &[u8]) -> STDRESULT {
        let (t,s,sec) = self.sector_ref(sector)?;
        store.write_sector(t,s,sec,buf)
    }
    pub fn mdb(&self,store: &dyn SectorStore) -> Result<Mdb,DYNERR> {
        let buf = self.read_sector(store,MDB_SECTOR)?;
        let mdb = Mdb::from_sector(&buf);
        if !mdb.plausible(self.xlat.positions()) {
            return Err(Box::new(Error::Structural));
        }
        Ok(mdb)
    }
    pub fn end_group(&self) -> u32 {
        // blocks 0,1 boot, 2 MDB, 3 bitmap, 2 spares at the end
        (self.xlat.positions() - FIRST_ALLOC_SECTOR - 2) as u32
    }
    pub fn bytes_per_group(&self) -> usize {
        SECTOR_SIZE
    }
    pub fn data_skip(&self) -> usize {
        0
    }
    pub fn group_ref(&self,group: u32) -> Result<GroupRef,DYNERR> {
        if group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        let (track,side,sec) = self.sector_ref(FIRST_ALLOC_SECTOR + group as usize)?;
        Ok(GroupRef::simple(group,track,side,sec))
    }
    /// bitmap bit, MSB first, set means used
    fn bit_coords(group: u32) -> (usize,u8) {
        (group as usize / 8,0x80 >> (group % 8))
    }
    pub fn is_group_used(&self,store: &dyn SectorStore,group: u32) -> Result<bool,DYNERR> {
        if group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        let vbm = self.read_sector(store,VBM_SECTOR)?;
        let (idx,mask) = Self::bit_coords(group);
        Ok(vbm[idx] & mask > 0)
    }
    pub fn group_value(&self,store: &dyn SectorStore,group: u32) -> Result<u32,DYNERR> {
        Ok(self.is_group_used(store,group)? as u32)
    }
    pub fn set_group_value(&self,store: &mut dyn SectorStore,group: u32,val: u32) -> STDRESULT {
        if group >= self.end_group() {
            return Err(Box::new(Error::Range));
        }
        let mut vbm = self.read_sector(store,VBM_SECTOR)?;
        let (idx,mask) = Self::bit_coords(group);
        let was_used = vbm[idx] & mask > 0;
        match val {
            0 => vbm[idx] &= !mask,
            _ => vbm[idx] |= mask
        };
        self.write_sector(store,VBM_SECTOR,&vbm)?;
        // keep the MDB free count honest
        let now_used = val > 0;
        if was_used != now_used {
            let mut mdbuf = self.read_sector(store,MDB_SECTOR)?;
            let free = get_u16(&mdbuf,34);
            set_u16(&mut mdbuf,34,match now_used {
                true => free.saturating_sub(1),
                false => free + 1
            });
            self.write_sector(store,MDB_SECTOR,&mdbuf)?;
        }
        Ok(())
    }
    pub fn next_empty_group(&self,store: &dyn SectorStore,prev: Option<u32>) -> Result<Option<u32>,DYNERR> {
        let vbm = self.read_sector(store,VBM_SECTOR)?;
        let start = match prev {
            Some(p) => p+1,
            None => 0
        };
        for g in start..self.end_group() {
            let (idx,mask) = Self::bit_coords(g);
            if vbm[idx] & mask == 0 {
                return Ok(Some(g));
            }
        }
        Ok(None)
    }
    pub fn allocate_groups(&self,store: &mut dyn SectorStore,size: usize,prev: Option<&GroupList>) -> Result<GroupList,DYNERR> {
        let needed = match size {
            0 => 0,
            s => (s + SECTOR_SIZE - 1) / SECTOR_SIZE
        };
        let mut list = GroupList::new(SECTOR_SIZE);
        let mut written: Vec<u32> = Vec::new();
        let mut last = match prev {
            Some(p) => p.last().map(|r| r.group),
            None => None
        };
        let appending = last.is_some();
        for i in 0..needed {
            let g = match self.next_empty_group(store,last)? {
                Some(g) => g,
                None => match self.next_empty_group(store,None)? {
                    Some(g) if written.iter().all(|w| *w != g) => g,
                    _ => {
                        for w in &written {
                            self.set_group_value(store,*w,0)?;
                        }
                        debug!("no space for block {} of {}",i+1,needed);
                        return Err(match written.is_empty() && !appending {
                            true => Box::new(Error::NoSpaceBeforeStart),
                            false => Box::new(Error::NoSpaceAfterStart)
                        });
                    }
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
        let mdb = self.mdb(store)?;
        let vbm = self.read_sector(store,VBM_SECTOR)?;
        let mut cat = vec![false;self.end_group() as usize];
        for (start,count) in mdb.cat_extents {
            for b in start..start.saturating_add(count) {
                if (b as usize) < cat.len() {
                    cat[b as usize] = true;
                }
            }
        }
        let mut ans = Vec::new();
        for g in 0..self.end_group() {
            let (idx,mask) = Self::bit_coords(g);
            ans.push(match (vbm[idx] & mask > 0,cat[g as usize]) {
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
        let buf = match self.read_sector(store,MDB_SECTOR) {
            Ok(b) => b,
            Err(_) => return -1.0
        };
        let mdb = Mdb::from_sector(&buf);
        if !mdb.plausible(self.xlat.positions()) {
            return -1.0;
        }
        let mut score = 0.5;
        // catalog header and leaf nodes carry their types
        if let Ok(hdr) = self.read_catalog_node(store,&mdb,0) {
            if hdr[8] == NODE_HEADER {
                score += 0.25;
            }
            let root = get_u32(&hdr,NODE_DESC_LEN+2);
            if let Ok(leaf) = self.read_catalog_node(store,&mdb,root) {
                if leaf[8] == NODE_LEAF {
                    score += 0.25;
                }
            }
        }
        score
    }
    pub fn parse_geometry(&mut self,store: &dyn SectorStore,formatting: bool) -> f64 {
        if formatting {
            return 1.0;
        }
        let mdb = match self.mdb(store) {
            Ok(m) => m,
            Err(_) => return -1.0
        };
        if mdb.al_blk_size as usize != SECTOR_SIZE {
            debug!("allocation block size {} not supported",mdb.al_blk_size);
            return -1.0;
        }
        1.0
    }
    /// catalog node to absolute sector via the catalog extents
    fn catalog_sector(&self,mdb: &Mdb,node: u32) -> Result<usize,DYNERR> {
        let mut remaining = node;
        for (start,count) in mdb.cat_extents {
            if remaining < count as u32 {
                return Ok(mdb.al_bl_start as usize + start as usize + remaining as usize);
            }
            remaining -= count as u32;
        }
        Err(Box::new(Error::Range))
    }
    pub fn read_catalog_node(&self,store: &dyn SectorStore,mdb: &Mdb,node: u32) -> Result<Vec<u8>,DYNERR> {
        self.read_sector(store,self.catalog_sector(mdb,node)?)
    }
    pub fn write_catalog_node(&self,store: &mut dyn SectorStore,mdb: &Mdb,node: u32,buf: &[u8]) -> STDRESULT {
        self.write_sector(store,self.catalog_sector(mdb,node)?,buf)
    }
    /// The catalog's own blocks, the closest thing to a root region.
    pub fn root_groups(&self,store: &dyn SectorStore) -> Result<GroupList,DYNERR> {
        let mdb = self.mdb(store)?;
        let mut list = GroupList::new(SECTOR_SIZE);
        for (start,count) in mdb.cat_extents {
            for b in start..start.saturating_add(count) {
                list.push(self.group_ref(b as u32)?);
            }
        }
        list.set_size(list.capacity());
        Ok(list)
    }
    pub fn volume_name(&self,store: &dyn SectorStore) -> Result<String,DYNERR> {
        let mdbuf = self.read_sector(store,MDB_SECTOR)?;
        let len = usize::min(mdbuf[36] as usize,27);
        Ok(String::from_utf8_lossy(&mdbuf[37..37+len]).to_string())
    }
    pub fn set_volume_name(&self,store: &mut dyn SectorStore,name: &str) -> STDRESULT {
        if !is_name_valid(name) || name.len() > 27 {
            return Err(Box::new(Error::BadName));
        }
        let mut mdbuf = self.read_sector(store,MDB_SECTOR)?;
        for b in &mut mdbuf[36..36+28] {
            *b = 0;
        }
        mdbuf[36] = name.len() as u8;
        mdbuf[37..37+name.len()].copy_from_slice(name.as_bytes());
        self.write_sector(store,MDB_SECTOR,&mdbuf)
    }
    pub fn format_disk(&self,store: &mut dyn SectorStore,name: &str) -> STDRESULT {
        if !is_name_valid(name) || name.len() > 27 {
            return Err(Box::new(Error::BadName));
        }
        let total = self.end_group();
        let mut mdbuf = vec![0;SECTOR_SIZE];
        set_u16(&mut mdbuf,0,SIG_MDB);
        let now = pack_date(None);
        set_u32(&mut mdbuf,2,now);
        set_u32(&mut mdbuf,6,now);
        set_u16(&mut mdbuf,14,VBM_SECTOR as u16);
        set_u16(&mut mdbuf,18,total as u16);
        set_u32(&mut mdbuf,20,SECTOR_SIZE as u32);
        set_u32(&mut mdbuf,24,4*SECTOR_SIZE as u32);
        set_u16(&mut mdbuf,28,FIRST_ALLOC_SECTOR as u16);
        set_u32(&mut mdbuf,30,FIRST_FILE_CNID);
        set_u16(&mut mdbuf,34,total as u16 - CATALOG_BLOCKS);
        mdbuf[36] = name.len() as u8;
        mdbuf[37..37+name.len()].copy_from_slice(name.as_bytes());
        set_u32(&mut mdbuf,146,CATALOG_BLOCKS as u32 * SECTOR_SIZE as u32);
        set_u16(&mut mdbuf,150,0);
        set_u16(&mut mdbuf,152,CATALOG_BLOCKS);
        self.write_sector(store,MDB_SECTOR,&mdbuf)?;
        // bitmap: catalog blocks used, pad bits beyond the last block used
        let mut vbm = vec![0;SECTOR_SIZE];
        for b in 0..CATALOG_BLOCKS as u32 {
            let (idx,mask) = Self::bit_coords(b);
            vbm[idx] |= mask;
        }
        for b in total..(SECTOR_SIZE*8) as u32 {
            let (idx,mask) = Self::bit_coords(b);
            vbm[idx] |= mask;
        }
        self.write_sector(store,VBM_SECTOR,&vbm)?;
        let mdb = Mdb::from_sector(&mdbuf);
        // header node: descriptor, then the header record
        let mut hdr = vec![0;NODE_SIZE];
        hdr[8] = NODE_HEADER;
        set_u16(&mut hdr,10,1);
        set_u16(&mut hdr,NODE_DESC_LEN,1); // tree depth
        set_u32(&mut hdr,NODE_DESC_LEN+2,1); // root node
        set_u32(&mut hdr,NODE_DESC_LEN+10,1); // first leaf
        set_u32(&mut hdr,NODE_DESC_LEN+14,1); // last leaf
        set_u16(&mut hdr,NODE_DESC_LEN+18,NODE_SIZE as u16);
        set_u32(&mut hdr,NODE_DESC_LEN+22,CATALOG_BLOCKS as u32);
        set_u32(&mut hdr,NODE_DESC_LEN+26,CATALOG_BLOCKS as u32 - 2);
        set_u16(&mut hdr,NODE_SIZE-2,NODE_DESC_LEN as u16);
        self.write_catalog_node(store,&mdb,0,&hdr)?;
        // one empty leaf
        let mut leaf = vec![0;NODE_SIZE];
        leaf[8] = NODE_LEAF;
        leaf[9] = 1;
        set_u16(&mut leaf,NODE_SIZE-2,NODE_DESC_LEN as u16);
        self.write_catalog_node(store,&mdb,1,&leaf)
    }
}

/// split a leaf node into its records
fn leaf_records(node: &[u8]) -> Vec<Vec<u8>> {
    let n = get_u16(node,10) as usize;
    let mut ans = Vec::new();
    for i in 0..n {
        let start = get_u16(node,NODE_SIZE-2*(i+1)) as usize;
        let end = get_u16(node,NODE_SIZE-2*(i+2)) as usize;
        if start < end && end <= NODE_SIZE - 2*(n+1) {
            ans.push(node[start..end].to_vec());
        }
    }
    ans
}

/// rebuild a leaf node from sorted records
fn pack_leaf(records: &[Vec<u8>]) -> Result<Vec<u8>,DYNERR> {
    let data: usize = records.iter().map(|r| r.len()).sum();
    if NODE_DESC_LEN + data + 2*(records.len()+1) > NODE_SIZE {
        debug!("catalog leaf is full");
        return Err(Box::new(Error::NoSpaceAfterStart));
    }
    let mut node = vec![0;NODE_SIZE];
    node[8] = NODE_LEAF;
    node[9] = 1;
    set_u16(&mut node,10,records.len() as u16);
    let mut at = NODE_DESC_LEN;
    for (i,rec) in records.iter().enumerate() {
        set_u16(&mut node,NODE_SIZE-2*(i+1),at as u16);
        node[at..at+rec.len()].copy_from_slice(rec);
        at += rec.len();
    }
    set_u16(&mut node,NODE_SIZE-2*(records.len()+1),at as u16);
    Ok(node)
}

fn key_parent(rec: &[u8]) -> u32 {
    get_u32(rec,2)
}

fn key_name(rec: &[u8]) -> String {
    let len = usize::min(rec[6] as usize,NAME_MAX);
    super::unpack_name(&rec[7..7+len],0x00)
}

fn data_offset(rec: &[u8]) -> usize {
    let key_len = rec[0] as usize;
    1 + key_len + (1 + key_len) % 2
}

fn sort_key(rec: &[u8]) -> (u32,String) {
    (key_parent(rec),key_name(rec).to_uppercase())
}

fn make_key(parent: u32,name: &str) -> Vec<u8> {
    let mut key = vec![0;7+name.len()];
    key[0] = (6 + name.len()) as u8;
    set_u32(&mut key,2,parent);
    key[6] = name.len() as u8;
    key[7..7+name.len()].copy_from_slice(name.as_bytes());
    if key.len() % 2 == 1 {
        key.push(0);
    }
    key
}

/// Directory entry codec.  The raw entry is one whole leaf record,
/// key included.
pub struct HfsEntries {
}

impl HfsEntries {
    pub fn new() -> Self {
        Self {}
    }
    pub fn layout(&self) -> DirLayout {
        DirLayout::Native
    }
    fn leaf(&self,store: &dyn SectorStore,alloc: &HfsAlloc) -> Result<(Mdb,Vec<Vec<u8>>),DYNERR> {
        let mdb = alloc.mdb(store)?;
        let hdr = alloc.read_catalog_node(store,&mdb,0)?;
        let root = get_u32(&hdr,NODE_DESC_LEN+2);
        let node = alloc.read_catalog_node(store,&mdb,root)?;
        if node[8] != NODE_LEAF {
            return Err(Box::new(Error::Structural));
        }
        Ok((mdb,leaf_records(&node)))
    }
    fn write_leaf(&self,store: &mut dyn SectorStore,alloc: &HfsAlloc,mdb: &Mdb,records: &[Vec<u8>]) -> STDRESULT {
        let hdr = alloc.read_catalog_node(store,mdb,0)?;
        let root = get_u32(&hdr,NODE_DESC_LEN+2);
        alloc.write_catalog_node(store,mdb,root,&pack_leaf(records)?)
    }
    /// all records whose key names `parent` as the enclosing directory
    pub fn enumerate(&self,store: &dyn SectorStore,alloc: &HfsAlloc,parent: u32) -> Result<Vec<Vec<u8>>,DYNERR> {
        let (_mdb,records) = self.leaf(store,alloc)?;
        Ok(records.into_iter().filter(|r| key_parent(r) == parent).collect())
    }
    pub fn check(&self,raw: &[u8],_last: &mut bool) -> bool {
        if raw.len() < 8 || raw[0] < 6 {
            return false;
        }
        let off = data_offset(raw);
        if off >= raw.len() {
            return false;
        }
        matches!(raw[off],REC_DIR | REC_FILE)
    }
    pub fn check_used(&self,_raw: &[u8],_unuse_hint: bool) -> bool {
        true
    }
    pub fn name(&self,raw: &[u8]) -> String {
        key_name(raw)
    }
    pub fn name_bytes<'a>(&self,raw: &'a [u8]) -> &'a [u8] {
        let len = usize::min(raw[6] as usize,NAME_MAX);
        &raw[7..7+len]
    }
    pub fn is_directory(&self,raw: &[u8]) -> bool {
        raw[data_offset(raw)] == REC_DIR
    }
    pub fn cnid(&self,raw: &[u8]) -> u32 {
        let off = data_offset(raw);
        match raw[off] {
            REC_DIR => get_u32(raw,off+6),
            _ => get_u32(raw,off+20)
        }
    }
    pub fn get_attr(&self,raw: &[u8]) -> FileAttr {
        let off = data_offset(raw);
        let mut common = 0;
        let mut origin = [0u32;3];
        match raw[off] {
            REC_DIR => {
                common |= super::DIRECTORY;
                origin[0] = get_u16(raw,off+2) as u32;
            },
            _ => {
                common |= super::BINARY;
                if raw[off+2] & FILE_LOCKED > 0 {
                    common |= super::READ_ONLY;
                }
                origin[0] = raw[off+2] as u32;
                origin[1] = get_u32(raw,off+4); // finder type
                origin[2] = get_u32(raw,off+8); // finder creator
            }
        };
        FileAttr {
            format: FormatKind::Hfs,
            common,
            origin
        }
    }
    pub fn set_attr(&self,raw: &mut [u8],attr: &FileAttr) {
        let off = data_offset(raw);
        if raw[off] != REC_FILE {
            return;
        }
        let (flags,ftype,creator) = match attr.format == FormatKind::Hfs {
            true => (attr.origin[0] as u8,attr.origin[1],attr.origin[2]),
            false => (match attr.common & super::READ_ONLY > 0 {
                true => FILE_LOCKED,
                false => 0
            },u32::from_be_bytes(*b"????"),u32::from_be_bytes(*b"????"))
        };
        raw[off+2] = flags;
        set_u32(raw,off+4,ftype);
        set_u32(raw,off+8,creator);
    }
    pub fn start_group(&self,raw: &[u8]) -> Option<u32> {
        let off = data_offset(raw);
        match raw[off] {
            REC_FILE => match get_u16(raw,off+74) {
                0 if get_u16(raw,off+76) == 0 => None,
                b => Some(b as u32)
            },
            _ => None
        }
    }
    /// data fork blocks from the three inline extents
    pub fn groups(&self,_store: &dyn SectorStore,alloc: &HfsAlloc,raw: &[u8]) -> Result<GroupList,DYNERR> {
        let off = data_offset(raw);
        let mut list = GroupList::new(SECTOR_SIZE);
        if raw[off] != REC_FILE {
            return Ok(list);
        }
        for i in 0..3 {
            let start = get_u16(raw,off+74+4*i);
            let count = get_u16(raw,off+76+4*i);
            for b in start..start.saturating_add(count) {
                list.push(alloc.group_ref(b as u32)?);
            }
        }
        let size = get_u32(raw,off+26) as usize;
        list.set_size(usize::min(size,list.capacity()));
        Ok(list)
    }
    pub fn file_size(&self,_store: &dyn SectorStore,_alloc: &HfsAlloc,raw: &[u8],_list: &GroupList) -> usize {
        let off = data_offset(raw);
        match raw[off] {
            REC_FILE => get_u32(raw,off+26) as usize,
            _ => 0
        }
    }
    /// Coalesce a group list into at most three extents.
    fn build_extents(list: &GroupList) -> Result<[(u16,u16);3],DYNERR> {
        let mut runs: Vec<(u16,u16)> = Vec::new();
        for r in list.iter() {
            match runs.last_mut() {
                Some((start,count)) if *start as u32 + *count as u32 == r.group => *count += 1,
                _ => runs.push((r.group as u16,1))
            };
        }
        if runs.len() > 3 {
            debug!("file would need {} extents",runs.len());
            return Err(Box::new(Error::Structural));
        }
        let mut ans = [(0,0);3];
        for (i,run) in runs.iter().enumerate() {
            ans[i] = *run;
        }
        Ok(ans)
    }
    fn find(&self,records: &[Vec<u8>],parent: u32,name: &str) -> Option<usize> {
        records.iter().position(|r| key_parent(r) == parent && key_name(r).eq_ignore_ascii_case(name))
    }
    fn insert_sorted(records: &mut Vec<Vec<u8>>,rec: Vec<u8>) {
        let key = sort_key(&rec);
        let at = records.iter().position(|r| sort_key(r) > key).unwrap_or(records.len());
        records.insert(at,rec);
    }
    fn bump_counts(&self,store: &mut dyn SectorStore,alloc: &HfsAlloc,files: i32,dirs: i32,take_cnid: bool) -> STDRESULT {
        let mut mdbuf = alloc.read_sector(store,MDB_SECTOR)?;
        let nf = get_u16(&mdbuf,12) as i32 + files;
        set_u16(&mut mdbuf,12,i32::max(nf,0) as u16);
        let nd = get_u32(&mdbuf,88) as i32 + dirs;
        set_u32(&mut mdbuf,88,i32::max(nd,0) as u32);
        if take_cnid {
            let next = get_u32(&mdbuf,30);
            set_u32(&mut mdbuf,30,next+1);
        }
        alloc.write_sector(store,MDB_SECTOR,&mdbuf)
    }
    /// Insert a file record with extents covering `data`.  Returns the
    /// new file's catalog node id.
    pub fn create_file(&self,store: &mut dyn SectorStore,alloc: &HfsAlloc,parent: u32,
                       attr: &DirItemAttr,data: &GroupList) -> Result<u32,DYNERR> {
        if !is_name_valid(&attr.name) {
            return Err(Box::new(Error::BadName));
        }
        let (mdb,mut records) = self.leaf(store,alloc)?;
        if self.find(&records,parent,&attr.name).is_some() {
            return Err(Box::new(Error::DuplicateFile));
        }
        let extents = Self::build_extents(data)?;
        let cnid = mdb.next_cnid;
        let mut rec = make_key(parent,&attr.name);
        let off = rec.len();
        rec.resize(off+FILE_REC_LEN,0);
        rec[off] = REC_FILE;
        if attr.common & super::READ_ONLY > 0 {
            rec[off+2] = FILE_LOCKED;
        }
        set_u32(&mut rec,off+4,u32::from_be_bytes(*b"????"));
        set_u32(&mut rec,off+8,u32::from_be_bytes(*b"????"));
        set_u32(&mut rec,off+20,cnid);
        set_u16(&mut rec,off+24,extents[0].0);
        set_u32(&mut rec,off+26,data.size() as u32);
        set_u32(&mut rec,off+30,data.capacity() as u32);
        let when = pack_date(attr.datetime);
        set_u32(&mut rec,off+44,when);
        set_u32(&mut rec,off+48,when);
        for i in 0..3 {
            set_u16(&mut rec,off+74+4*i,extents[i].0);
            set_u16(&mut rec,off+76+4*i,extents[i].1);
        }
        Self::insert_sorted(&mut records,rec);
        self.write_leaf(store,alloc,&mdb,&records)?;
        self.bump_counts(store,alloc,1,0,true)?;
        trace!("cataloged {} as cnid {}",attr.name,cnid);
        Ok(cnid)
    }
    pub fn create_dir(&self,store: &mut dyn SectorStore,alloc: &HfsAlloc,parent: u32,attr: &DirItemAttr) -> Result<u32,DYNERR> {
        if !is_name_valid(&attr.name) {
            return Err(Box::new(Error::BadName));
        }
        let (mdb,mut records) = self.leaf(store,alloc)?;
        if self.find(&records,parent,&attr.name).is_some() {
            return Err(Box::new(Error::DuplicateFile));
        }
        let cnid = mdb.next_cnid;
        let mut rec = make_key(parent,&attr.name);
        let off = rec.len();
        rec.resize(off+DIR_REC_LEN,0);
        rec[off] = REC_DIR;
        set_u32(&mut rec,off+6,cnid);
        let when = pack_date(attr.datetime);
        set_u32(&mut rec,off+10,when);
        set_u32(&mut rec,off+14,when);
        Self::insert_sorted(&mut records,rec);
        self.write_leaf(store,alloc,&mdb,&records)?;
        self.bump_counts(store,alloc,0,1,true)?;
        Ok(cnid)
    }
    pub fn lookup(&self,store: &dyn SectorStore,alloc: &HfsAlloc,parent: u32,name: &str) -> Result<Option<Vec<u8>>,DYNERR> {
        let (_mdb,records) = self.leaf(store,alloc)?;
        Ok(self.find(&records,parent,name).map(|i| records[i].clone()))
    }
    /// Remove a record.  A directory must have no children.
    pub fn remove(&self,store: &mut dyn SectorStore,alloc: &HfsAlloc,parent: u32,name: &str) -> STDRESULT {
        let (mdb,mut records) = self.leaf(store,alloc)?;
        let at = match self.find(&records,parent,name) {
            Some(i) => i,
            None => return Err(Box::new(Error::FileNotFound))
        };
        let was_dir = self.is_directory(&records[at]);
        if was_dir {
            let id = self.cnid(&records[at]);
            if records.iter().any(|r| key_parent(r) == id) {
                return Err(Box::new(Error::DeleteNotEmpty));
            }
        }
        records.remove(at);
        self.write_leaf(store,alloc,&mdb,&records)?;
        match was_dir {
            true => self.bump_counts(store,alloc,0,-1,false),
            false => self.bump_counts(store,alloc,-1,0,false)
        }
    }
    /// Rename re-keys the record, so it is a remove and sorted re-insert.
    pub fn rename(&self,store: &mut dyn SectorStore,alloc: &HfsAlloc,parent: u32,old_name: &str,new_name: &str) -> STDRESULT {
        if !is_name_valid(new_name) {
            return Err(Box::new(Error::BadName));
        }
        let (mdb,mut records) = self.leaf(store,alloc)?;
        if self.find(&records,parent,new_name).is_some() {
            return Err(Box::new(Error::DuplicateFile));
        }
        let at = match self.find(&records,parent,old_name) {
            Some(i) => i,
            None => return Err(Box::new(Error::FileNotFound))
        };
        let old = records.remove(at);
        let mut rec = make_key(parent,new_name);
        rec.extend_from_slice(&old[data_offset(&old)..]);
        Self::insert_sorted(&mut records,rec);
        self.write_leaf(store,alloc,&mdb,&records)
    }
    /// update an existing record's data portion in place
    pub fn update(&self,store: &mut dyn SectorStore,alloc: &HfsAlloc,raw: &[u8]) -> STDRESULT {
        let (mdb,mut records) = self.leaf(store,alloc)?;
        let at = match self.find(&records,key_parent(raw),&key_name(raw)) {
            Some(i) => i,
            None => return Err(Box::new(Error::FileNotFound))
        };
        records[at] = raw.to_vec();
        self.write_leaf(store,alloc,&mdb,&records)
    }
    pub fn has_date(&self) -> bool {
        true
    }
    pub fn get_date(&self,raw: &[u8]) -> Option<chrono::NaiveDateTime> {
        let off = data_offset(raw);
        match raw[off] {
            REC_DIR => unpack_date(get_u32(raw,off+10)),
            _ => unpack_date(get_u32(raw,off+44))
        }
    }
    pub fn set_date(&self,raw: &mut [u8],dt: chrono::NaiveDateTime) {
        let off = data_offset(raw);
        let secs = pack_date(Some(dt));
        match raw[off] {
            REC_DIR => set_u32(raw,off+10,secs),
            _ => set_u32(raw,off+44,secs)
        };
    }
    pub fn has_addresses(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::templates;

    fn setup() -> (crate::store::MemStore,HfsAlloc,HfsEntries) {
        let t = templates::template(FormatKind::Hfs);
        let mut store = t.blank_store();
        let alloc = HfsAlloc::open(t.translator().expect("bad translator"));
        alloc.format_disk(&mut store,"Untitled").expect("format failed");
        (store,alloc,HfsEntries::new())
    }
    #[test]
    fn fresh_volume_passes_checks() {
        let (store,alloc,_codec) = setup();
        assert!(alloc.check_consistency(&store,false) > 0.9);
        let mdb = alloc.mdb(&store).expect("mdb");
        assert_eq!(mdb.vol_name,"Untitled");
        assert_eq!(mdb.free_blks,mdb.num_al_blks - CATALOG_BLOCKS);
    }
    #[test]
    fn catalog_blocks_are_used() {
        let (store,alloc,_codec) = setup();
        assert!(alloc.is_group_used(&store,0).expect("range"));
        assert!(alloc.is_group_used(&store,CATALOG_BLOCKS as u32 - 1).expect("range"));
        assert!(!alloc.is_group_used(&store,CATALOG_BLOCKS as u32).expect("range"));
    }
    #[test]
    fn file_record_round_trip() {
        let (mut store,alloc,codec) = setup();
        let data = alloc.allocate_groups(&mut store,2000,None).expect("allocation failed");
        let cnid = codec.create_file(&mut store,&alloc,ROOT_CNID,
            &DirItemAttr::named("ReadMe"),&data).expect("create failed");
        assert_eq!(cnid,FIRST_FILE_CNID);
        let rec = codec.lookup(&store,&alloc,ROOT_CNID,"ReadMe").expect("io").expect("missing");
        assert!(codec.check(&rec,&mut false));
        assert_eq!(codec.name(&rec),"ReadMe");
        let walked = codec.groups(&store,&alloc,&rec).expect("walk failed");
        assert_eq!(walked.count(),4);
        assert_eq!(codec.file_size(&store,&alloc,&rec,&walked),2000);
        // contiguous blocks collapse to one extent
        assert_eq!(codec.start_group(&rec),Some(CATALOG_BLOCKS as u32));
    }
    #[test]
    fn records_keep_catalog_order() {
        let (mut store,alloc,codec) = setup();
        for name in ["zebra","Apple","mango"] {
            let data = alloc.allocate_groups(&mut store,100,None).expect("allocation failed");
            codec.create_file(&mut store,&alloc,ROOT_CNID,&DirItemAttr::named(name),&data).expect("create failed");
        }
        let recs = codec.enumerate(&store,&alloc,ROOT_CNID).expect("io");
        let names: Vec<String> = recs.iter().map(|r| codec.name(r)).collect();
        assert_eq!(names,vec!["Apple","mango","zebra"]);
    }
    #[test]
    fn directory_must_be_empty_to_delete() {
        let (mut store,alloc,codec) = setup();
        let dir_id = codec.create_dir(&mut store,&alloc,ROOT_CNID,&DirItemAttr::named("System Folder")).expect("create failed");
        let data = alloc.allocate_groups(&mut store,100,None).expect("allocation failed");
        codec.create_file(&mut store,&alloc,dir_id,&DirItemAttr::named("Finder"),&data).expect("create failed");
        match codec.remove(&mut store,&alloc,ROOT_CNID,"System Folder") {
            Err(e) => assert_eq!(e.to_string(),Error::DeleteNotEmpty.to_string()),
            Ok(_) => panic!("expected refusal")
        };
        codec.remove(&mut store,&alloc,dir_id,"Finder").expect("remove failed");
        codec.remove(&mut store,&alloc,ROOT_CNID,"System Folder").expect("remove failed");
        assert!(codec.lookup(&store,&alloc,ROOT_CNID,"System Folder").expect("io").is_none());
    }
    #[test]
    fn too_many_extents_is_refused() {
        let (mut store,alloc,codec) = setup();
        // pin blocks to force fragmentation: use groups 12,14,16,18
        for g in [13u32,15,17,19] {
            alloc.set_group_value(&mut store,g,1).expect("io");
        }
        let mut data = GroupList::new(SECTOR_SIZE);
        for g in [12u32,14,16,18] {
            data.push(alloc.group_ref(g).expect("range"));
        }
        data.set_size(4*SECTOR_SIZE);
        match codec.create_file(&mut store,&alloc,ROOT_CNID,&DirItemAttr::named("shards"),&data) {
            Err(e) => assert_eq!(e.to_string(),Error::Structural.to_string()),
            Ok(_) => panic!("expected refusal")
        };
    }
    #[test]
    fn rename_rekeys_in_order() {
        let (mut store,alloc,codec) = setup();
        for name in ["alpha","omega"] {
            let data = alloc.allocate_groups(&mut store,100,None).expect("allocation failed");
            codec.create_file(&mut store,&alloc,ROOT_CNID,&DirItemAttr::named(name),&data).expect("create failed");
        }
        codec.rename(&mut store,&alloc,ROOT_CNID,"alpha","zulu").expect("rename failed");
        let recs = codec.enumerate(&store,&alloc,ROOT_CNID).expect("io");
        let names: Vec<String> = recs.iter().map(|r| codec.name(r)).collect();
        assert_eq!(names,vec!["omega","zulu"]);
    }
}
