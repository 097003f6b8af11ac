//! ### Directory controller
//!
//! Format-agnostic walk over an allocator/codec pair.  `assign_root`
//! materializes the whole directory tree into an arena: nodes reference
//! parent and children by index, never by pointer, so releasing a
//! sub-tree is just dropping indices.
//!
//! For flat directories the walk slices each sector into entry-sized
//! records, honoring the codec's per-sector and root skips.  Hash table
//! and B-tree directories enumerate through the codec instead, and the
//! slot machinery here does not apply to them.
//!
//! `check_directory` runs the same walk in probe mode and scores the
//! fraction of printable name characters among used entries; the
//! detector consumes that score when several formats pass their
//! structural checks.

use log::{trace,debug};
use crate::store::{SectorStore,patch_sector};
use crate::DYNERR;
use super::{Error,FormatKind,GroupList,DirLayout};
use super::alloc::Allocator;
use super::entry::EntryCodec;

/// recursion ceiling for sub-directory expansion
const MAX_DEPTH: usize = 8;

/// Disk position of one flat directory slot.
#[derive(Clone,Copy,Debug)]
pub struct SlotRef {
    pub track: usize,
    pub side: usize,
    pub sector: usize,
    pub offset: usize
}

/// One materialized directory record.
pub struct DirNode {
    pub name: String,
    pub raw: Vec<u8>,
    /// where the record lives, flat formats only
    pub slot: Option<SlotRef>,
    /// enumeration token, native formats only
    pub token: Option<u32>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub is_dir: bool
}

/// Arena of directory nodes.  Index 0 is the synthetic root.
pub struct DirTree {
    nodes: Vec<DirNode>
}

impl DirTree {
    pub fn root(&self) -> usize {
        0
    }
    pub fn node(&self,idx: usize) -> &DirNode {
        &self.nodes[idx]
    }
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }
    pub fn children(&self,idx: usize) -> &[usize] {
        &self.nodes[idx].children
    }
    /// child of `idx` matching `name`, case folded
    pub fn find(&self,idx: usize,name: &str) -> Option<usize> {
        self.nodes[idx].children.iter().copied()
            .find(|c| self.nodes[*c].name.eq_ignore_ascii_case(name))
    }
    /// walk a path of the form `DIR/DIR/FILE` from the root
    pub fn resolve(&self,path: &str) -> Option<usize> {
        let mut at = self.root();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            at = self.find(at,part)?;
        }
        match at == self.root() {
            true => None,
            false => Some(at)
        }
    }
    fn push(&mut self,node: DirNode) -> usize {
        let idx = self.nodes.len();
        let parent = node.parent;
        self.nodes.push(node);
        if let Some(p) = parent {
            self.nodes[p].children.push(idx);
        }
        idx
    }
}

/// visit every slot of a flat directory region
fn walk_flat<F>(store: &dyn SectorStore,list: &GroupList,entry_len: usize,sector_skip: usize,
                root_skip: usize,mut visit: F) -> Result<(),DYNERR>
where F: FnMut(SlotRef,&[u8]) -> bool {
    let mut first = true;
    for r in list.iter() {
        for sector in r.sector_start..=r.sector_end {
            let buf = store.read_sector(r.track,r.side,sector)?;
            let mut offset = sector_skip + match first {
                true => root_skip,
                false => 0
            };
            first = false;
            while offset + entry_len <= buf.len() {
                let slot = SlotRef {track: r.track, side: r.side, sector, offset};
                if !visit(slot,&buf[offset..offset+entry_len]) {
                    return Ok(());
                }
                offset += entry_len;
            }
        }
    }
    Ok(())
}

fn assign_flat(tree: &mut DirTree,store: &dyn SectorStore,alloc: &Allocator,codec: &EntryCodec,
               parent: usize,list: &GroupList,depth: usize) -> Result<(),DYNERR> {
    if depth > MAX_DEPTH {
        return Err(Box::new(Error::ChainLimit));
    }
    let (entry_len,sector_skip,root_skip) = match codec.layout() {
        DirLayout::Flat {entry_len,sector_skip,root_skip} => (entry_len,sector_skip,root_skip),
        DirLayout::Native => return Err(Box::new(Error::Unsupported))
    };
    let at_root = depth == 0;
    let mut found: Vec<(SlotRef,Vec<u8>)> = Vec::new();
    let mut seen: Vec<Vec<u8>> = Vec::new();
    walk_flat(store,list,entry_len,sector_skip,match at_root {true => root_skip, false => 0},
        |slot,raw| {
        let mut last = false;
        if !codec.check(raw,&mut last) {
            return true;
        }
        if codec.check_used(raw,false) {
            // CP/M files span records; keep the first of each
            if !seen.iter().any(|s| codec.same_file(s,raw)) {
                found.push((slot,raw.to_vec()));
                seen.push(raw.to_vec());
            }
        }
        !last
    })?;
    for (slot,raw) in found {
        let attr = codec.get_attr(&raw);
        let name = codec.name(&raw);
        if name == "." || name == ".." {
            continue;
        }
        let is_dir = attr.is_set(super::DIRECTORY);
        let idx = tree.push(DirNode {
            name,
            raw: raw.clone(),
            slot: Some(slot),
            token: None,
            parent: Some(parent),
            children: Vec::new(),
            is_dir
        });
        if is_dir {
            let sub = codec.groups(store,alloc,&raw)?;
            assign_flat(tree,store,alloc,codec,idx,&sub,depth+1)?;
        }
    }
    Ok(())
}

fn assign_native(tree: &mut DirTree,store: &dyn SectorStore,alloc: &Allocator,codec: &EntryCodec,
                 parent: usize,token: u32,depth: usize) -> Result<(),DYNERR> {
    if depth > MAX_DEPTH {
        return Err(Box::new(Error::ChainLimit));
    }
    for (tok,raw) in codec.enumerate(store,alloc,token)? {
        let attr = codec.get_attr(&raw);
        let is_dir = attr.is_set(super::DIRECTORY);
        let idx = tree.push(DirNode {
            name: codec.name(&raw),
            raw,
            slot: None,
            token: Some(tok),
            parent: Some(parent),
            children: Vec::new(),
            is_dir
        });
        if is_dir {
            assign_native(tree,store,alloc,codec,idx,tok,depth+1)?;
        }
    }
    Ok(())
}

/// Materialize the whole directory tree.
pub fn assign_root(store: &dyn SectorStore,alloc: &Allocator,codec: &EntryCodec) -> Result<DirTree,DYNERR> {
    let mut tree = DirTree {
        nodes: vec![DirNode {
            name: String::new(),
            raw: Vec::new(),
            slot: None,
            token: codec.root_token(alloc),
            parent: None,
            children: Vec::new(),
            is_dir: true
        }]
    };
    match codec.layout() {
        DirLayout::Flat {..} => {
            let list = alloc.root_groups(store)?;
            assign_flat(&mut tree,store,alloc,codec,0,&list,0)?;
        },
        DirLayout::Native => {
            let token = match codec.root_token(alloc) {
                Some(t) => t,
                None => return Err(Box::new(Error::Unsupported))
            };
            assign_native(&mut tree,store,alloc,codec,0,token,0)?;
        }
    };
    trace!("directory tree has {} nodes",tree.len()-1);
    Ok(tree)
}

/// Probe mode walk: fraction of printable name characters among used
/// entries, negative as soon as any entry fails its structural check.
pub fn check_directory(store: &dyn SectorStore,alloc: &Allocator,codec: &EntryCodec,is_root: bool,list: &GroupList) -> f64 {
    match codec.layout() {
        DirLayout::Flat {entry_len,sector_skip,root_skip} => {
            let mut used = 0usize;
            let mut printable = 0.0;
            let mut bad = false;
            let walked = walk_flat(store,list,entry_len,sector_skip,match is_root {true => root_skip, false => 0},
                |_slot,raw| {
                let mut last = false;
                if !codec.check(raw,&mut last) {
                    bad = true;
                    return false;
                }
                if codec.check_used(raw,false) {
                    used += 1;
                    printable += super::printable_fraction(codec.name_bytes(raw));
                }
                !last
            });
            if walked.is_err() || bad {
                return -1.0;
            }
            match used {
                0 => 1.0,
                n => printable / n as f64
            }
        },
        DirLayout::Native => {
            let token = match codec.root_token(alloc) {
                Some(t) => t,
                None => return -1.0
            };
            match codec.enumerate(store,alloc,token) {
                Ok(entries) => {
                    let mut used = 0usize;
                    let mut printable = 0.0;
                    for (_tok,raw) in entries {
                        if !codec.check(&raw,&mut false) {
                            return -1.0;
                        }
                        used += 1;
                        printable += super::printable_fraction(codec.name_bytes(&raw));
                    }
                    match used {
                        0 => 1.0,
                        n => printable / n as f64
                    }
                },
                Err(_) => -1.0
            }
        }
    }
}

/// whether a sub-directory region has any visible entry left
pub fn is_empty_directory(store: &dyn SectorStore,alloc: &Allocator,codec: &EntryCodec,node: &DirNode) -> Result<bool,DYNERR> {
    match codec.layout() {
        DirLayout::Flat {entry_len,sector_skip,..} => {
            let list = codec.groups(store,alloc,&node.raw)?;
            let mut empty = true;
            walk_flat(store,&list,entry_len,sector_skip,0,|_slot,raw| {
                let mut last = false;
                if codec.check(raw,&mut last) && codec.check_used(raw,false) {
                    let name = codec.name(raw);
                    if name != "." && name != ".." {
                        empty = false;
                        return false;
                    }
                }
                !last
            })?;
            Ok(empty)
        },
        DirLayout::Native => {
            let token = match node.token {
                Some(t) => t,
                None => return Err(Box::new(Error::Structural))
            };
            Ok(codec.enumerate(store,alloc,token)?.is_empty())
        }
    }
}

/// Locate a free slot in a flat directory region.  TRSDOS 2.x reserves
/// the last two slots of each sector for system files.
pub fn find_empty_slot(store: &dyn SectorStore,alloc: &Allocator,codec: &EntryCodec,is_root: bool,
                       list: &GroupList,system: bool) -> Result<Option<SlotRef>,DYNERR> {
    let (entry_len,sector_skip,root_skip) = match codec.layout() {
        DirLayout::Flat {entry_len,sector_skip,root_skip} => (entry_len,sector_skip,root_skip),
        DirLayout::Native => return Err(Box::new(Error::Unsupported))
    };
    let affinity = alloc.kind() == FormatKind::Trsdos2x && !system;
    let mut ans = None;
    walk_flat(store,list,entry_len,sector_skip,match is_root {true => root_skip, false => 0},
        |slot,raw| {
        if affinity {
            let sector_len = store.sector_size(slot.track,slot.side);
            let slots = (sector_len - sector_skip) / entry_len;
            let slot_idx = (slot.offset - sector_skip) / entry_len;
            if slot_idx + 2 >= slots {
                return true;
            }
        }
        let mut last = false;
        if codec.check(raw,&mut last) && !codec.check_used(raw,true) {
            ans = Some(slot);
            return false;
        }
        !last
    })?;
    Ok(ans)
}

/// whether the root directory can grow by another group
pub fn can_expand(alloc: &Allocator) -> bool {
    matches!(alloc,Allocator::C1541(_) | Allocator::Flex(_))
}

/// Grow the root directory by one group and return the fresh region.
pub fn expand(store: &mut dyn SectorStore,alloc: &Allocator) -> Result<GroupList,DYNERR> {
    match alloc.expand_root(store)? {
        Some(_) => {
            debug!("directory expanded by one group");
            alloc.root_groups(store)
        },
        None => Err(Box::new(Error::NoSpaceAfterStart))
    }
}

/// store a record back into its slot
pub fn write_slot(store: &mut dyn SectorStore,slot: SlotRef,raw: &[u8]) -> crate::STDRESULT {
    patch_sector(store,slot.track,slot.side,slot.sector,slot.offset,raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{templates,DirItemAttr};

    fn fat8_setup() -> (crate::store::MemStore,Allocator,EntryCodec) {
        let t = templates::template(FormatKind::Fat8);
        let mut store = t.blank_store();
        let mut alloc = Allocator::open(FormatKind::Fat8,t.translator().expect("bad translator"));
        alloc.format_disk(&mut store,"",0).expect("format failed");
        (store,alloc,EntryCodec::new(FormatKind::Fat8))
    }
    #[test]
    fn fresh_root_is_empty() {
        let (store,alloc,codec) = fat8_setup();
        let tree = assign_root(&store,&alloc,&codec).expect("walk failed");
        assert!(tree.is_empty());
        let list = alloc.root_groups(&store).expect("io");
        assert_eq!(check_directory(&store,&alloc,&codec,true,&list),1.0);
    }
    #[test]
    fn entry_appears_in_tree() {
        let (mut store,alloc,codec) = fat8_setup();
        let data = alloc.allocate_groups(&mut store,100,None).expect("allocation failed");
        let raw = codec.create(&DirItemAttr::named("HELLO.BAS"),data.first().unwrap().group).expect("create failed");
        let records = codec.bind(&mut store,&alloc,raw,&data).expect("bind failed");
        let list = alloc.root_groups(&store).expect("io");
        let slot = find_empty_slot(&store,&alloc,&codec,true,&list,false).expect("io").expect("no slot");
        write_slot(&mut store,slot,&records[0]).expect("write failed");
        let tree = assign_root(&store,&alloc,&codec).expect("walk failed");
        assert_eq!(tree.len(),2);
        let idx = tree.resolve("HELLO.BAS").expect("missing");
        assert!(!tree.node(idx).is_dir);
    }
    #[test]
    fn corruption_drives_score_down() {
        let (mut store,alloc,codec) = fat8_setup();
        let data = alloc.allocate_groups(&mut store,100,None).expect("allocation failed");
        let raw = codec.create(&DirItemAttr::named("GOOD.BAS"),data.first().unwrap().group).expect("create failed");
        let records = codec.bind(&mut store,&alloc,raw,&data).expect("bind failed");
        let list = alloc.root_groups(&store).expect("io");
        let slot = find_empty_slot(&store,&alloc,&codec,true,&list,false).expect("io").expect("no slot");
        write_slot(&mut store,slot,&records[0]).expect("write failed");
        let clean = check_directory(&store,&alloc,&codec,true,&list);
        assert_eq!(clean,1.0);
        // unprintable name bytes lower the score but pass the check
        let mut smudged = records[0].clone();
        smudged[1] = 0x01;
        write_slot(&mut store,slot,&smudged).expect("write failed");
        let lower = check_directory(&store,&alloc,&codec,true,&list);
        assert!(lower < clean && lower > 0.0);
        // a reserved byte violation fails the check outright
        let mut broken = records[0].clone();
        broken[12] = 0xee;
        write_slot(&mut store,slot,&broken).expect("write failed");
        assert!(check_directory(&store,&alloc,&codec,true,&list) < 0.0);
    }
    #[test]
    fn trsdos_2x_reserves_high_slots() {
        let t = templates::template(FormatKind::Trsdos2x);
        let mut store = t.blank_store();
        let mut alloc = Allocator::open(FormatKind::Trsdos2x,t.translator().expect("bad translator"));
        alloc.format_disk(&mut store,"DISK",0).expect("format failed");
        let codec = EntryCodec::new(FormatKind::Trsdos2x);
        let list = alloc.root_groups(&store).expect("io");
        let user = find_empty_slot(&store,&alloc,&codec,true,&list,false).expect("io").expect("no slot");
        let system = find_empty_slot(&store,&alloc,&codec,true,&list,true).expect("io").expect("no slot");
        assert_eq!(user.sector,system.sector);
        assert_eq!(user.offset,system.offset);
        // fill the unreserved slots of the first sector
        let sector_len = store.sector_size(user.track,user.side);
        let slots = sector_len / 32;
        for i in 0..slots-2 {
            let data = alloc.allocate_groups(&mut store,100,None).expect("allocation failed");
            let raw = codec.create(&DirItemAttr::named(&format!("FILE{}",i)),0).expect("create failed");
            let records = codec.bind(&mut store,&alloc,raw,&data).expect("bind failed");
            let slot = find_empty_slot(&store,&alloc,&codec,true,&list,false).expect("io").expect("no slot");
            write_slot(&mut store,slot,&records[0]).expect("write failed");
        }
        // a user file skips to the next sector, a system file does not
        let user = find_empty_slot(&store,&alloc,&codec,true,&list,false).expect("io").expect("no slot");
        let system = find_empty_slot(&store,&alloc,&codec,true,&list,true).expect("io").expect("no slot");
        assert_ne!(user.sector,system.sector);
        assert_eq!(system.offset,(slots-2)*32);
    }
    #[test]
    fn amiga_tree_includes_subdirectory() {
        let t = templates::template(FormatKind::AmigaOfs);
        let mut store = t.blank_store();
        let mut alloc = Allocator::open(FormatKind::AmigaOfs,t.translator().expect("bad translator"));
        alloc.format_disk(&mut store,"Workbench",0).expect("format failed");
        let codec = EntryCodec::new(FormatKind::AmigaOfs);
        if let (Allocator::Amiga(a),EntryCodec::Amiga(c)) = (&alloc,&codec) {
            let empty = GroupList::new(a.bytes_per_group());
            let dir_block = c.write_header(&mut store,a,a.root_block(),
                &DirItemAttr::named("Devs"),&empty,true).expect("write failed");
            let data = a.allocate_groups(&mut store,500,None).expect("allocation failed");
            c.write_header(&mut store,a,dir_block,
                &DirItemAttr::named("system-configuration"),&data,false).expect("write failed");
        } else {
            panic!("wrong dispatch arms");
        }
        let tree = assign_root(&store,&alloc,&codec).expect("walk failed");
        let devs = tree.resolve("Devs").expect("missing");
        assert!(tree.node(devs).is_dir);
        assert!(tree.resolve("Devs/system-configuration").is_some());
    }
}
