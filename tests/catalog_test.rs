// catalog behavior of the flat directory family
use retrofs::FileSystem;
use retrofs::fs::{templates,FormatKind,DirItemAttr};
use retrofs::store::MemStore;

fn formatted(kind: FormatKind) -> (MemStore,FileSystem) {
    let _ = env_logger::builder().is_test(true).try_init();
    let t = templates::template(kind);
    let mut store = t.blank_store();
    let mut disk = FileSystem::with_kind(kind).expect("bad template");
    disk.format(&mut store,"TEST",42).expect("format failed");
    (store,disk)
}

#[test]
fn catalog_lists_every_file() {
    let (mut store,disk) = formatted(FormatKind::Flex);
    for (name,len) in [("ALPHA.TXT",100usize),("BETA.BIN",200),("GAMMA.DAT",300)] {
        disk.write_file(&mut store,name,&DirItemAttr::default(),&vec![0x55u8;len]).expect("write failed");
    }
    let items = disk.list(&store,"").expect("catalog failed");
    assert_eq!(items.len(),3);
    for (name,len) in [("ALPHA.TXT",100usize),("BETA.BIN",200),("GAMMA.DAT",300)] {
        let item = items.iter().find(|i| i.name == name).expect("missing entry");
        assert_eq!(item.size,len);
        assert!(!item.is_dir);
    }
}

#[test]
fn refused_names_cost_nothing() {
    let (mut store,disk) = formatted(FormatKind::Fat12);
    disk.write_file(&mut store,"A.TXT",&DirItemAttr::default(),b"first").expect("write failed");
    let before = disk.free(&store).expect("scan failed").free;
    assert!(disk.write_file(&mut store,"A.TXT",&DirItemAttr::default(),b"second").is_err());
    assert!(disk.write_file(&mut store,"TOOLONGNAME.TXT",&DirItemAttr::default(),b"third").is_err());
    assert_eq!(disk.free(&store).expect("scan failed").free,before);
    assert_eq!(disk.read_file(&store,"A.TXT").expect("read failed"),b"first");
}

#[test]
fn cpm_files_span_extent_records() {
    // 20 blocks need a second extent entry in the directory
    let (mut store,disk) = formatted(FormatKind::Cpm);
    let before = disk.free(&store).expect("scan failed").free;
    let content: Vec<u8> = (0..20480).map(|i| (1 + i % 251) as u8).collect();
    disk.write_file(&mut store,"LEDGER.DAT",&DirItemAttr::default(),&content).expect("write failed");
    assert_eq!(disk.free(&store).expect("scan failed").free,before - 20);
    let items = disk.list(&store,"").expect("catalog failed");
    assert_eq!(items.len(),1,"extent records must fold into one item");
    assert_eq!(items[0].size,20480);
    disk.rename(&mut store,"LEDGER.DAT","ARCHIVE.DAT").expect("rename failed");
    assert!(disk.read_file(&store,"LEDGER.DAT").is_err());
    assert_eq!(disk.read_file(&store,"ARCHIVE.DAT").expect("read failed"),content);
    disk.delete(&mut store,"ARCHIVE.DAT").expect("delete failed");
    assert_eq!(disk.free(&store).expect("scan failed").free,before);
}

#[test]
fn volume_labels_round_trip() {
    for kind in [FormatKind::C1541,FormatKind::Flex,FormatKind::Trsdos13,
                 FormatKind::AmigaFfs,FormatKind::Hfs] {
        let (mut store,disk) = formatted(kind);
        assert_eq!(disk.volume_name(&store).expect("read failed"),Some("TEST".to_string()),"{}",kind);
        disk.set_volume_name(&mut store,"RELABEL").expect("relabel failed");
        assert_eq!(disk.volume_name(&store).expect("read failed"),Some("RELABEL".to_string()),"{}",kind);
    }
    // the FAT label is a directory entry wearing the volume bit
    let (mut store,disk) = formatted(FormatKind::Fat12);
    assert_eq!(disk.volume_name(&store).expect("read failed"),None);
    disk.set_volume_name(&mut store,"MYDISK").expect("label failed");
    assert_eq!(disk.volume_name(&store).expect("read failed"),Some("MYDISK".to_string()));
    disk.set_volume_name(&mut store,"NEWLABEL").expect("relabel failed");
    assert_eq!(disk.volume_name(&store).expect("read failed"),Some("NEWLABEL".to_string()));
}

#[test]
fn trsdos_hash_index_follows_renames() {
    let (mut store,disk) = formatted(FormatKind::Trsdos13);
    disk.write_file(&mut store,"PAYROLL/BAS",&DirItemAttr::default(),&vec![0x20u8;900]).expect("write failed");
    disk.rename(&mut store,"PAYROLL/BAS","LEDGER/BAS").expect("rename failed");
    assert!(disk.read_file(&store,"PAYROLL/BAS").is_err());
    assert_eq!(disk.read_file(&store,"LEDGER/BAS").expect("read failed").len(),900);
    disk.delete(&mut store,"LEDGER/BAS").expect("delete failed");
    assert!(disk.list(&store,"").expect("catalog failed").is_empty());
    // the freed hash slot is reusable
    disk.write_file(&mut store,"INVOICE/BAS",&DirItemAttr::default(),&vec![0x21u8;900]).expect("write failed");
    assert_eq!(disk.read_file(&store,"INVOICE/BAS").expect("read failed").len(),900);
}
