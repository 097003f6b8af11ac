// nested directory operations on the three tree capable formats
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
fn fat12_nested_directories() {
    let (mut store,disk) = formatted(FormatKind::Fat12);
    disk.create_dir(&mut store,"DOCS").expect("mkdir failed");
    disk.create_dir(&mut store,"DOCS/NOTES").expect("nested mkdir failed");
    let content = vec![0x31u8;800];
    disk.write_file(&mut store,"DOCS/NOTES/A.TXT",&DirItemAttr::default(),&content).expect("write failed");
    let items = disk.list(&store,"DOCS").expect("catalog failed");
    assert_eq!(items.len(),1);
    assert!(items[0].is_dir);
    assert_eq!(items[0].name,"NOTES");
    assert_eq!(disk.read_file(&store,"DOCS/NOTES/A.TXT").expect("read failed"),content);
    // occupied directories refuse deletion at every level
    assert!(disk.delete(&mut store,"DOCS").is_err());
    assert!(disk.delete(&mut store,"DOCS/NOTES").is_err());
    disk.delete(&mut store,"DOCS/NOTES/A.TXT").expect("delete failed");
    disk.delete(&mut store,"DOCS/NOTES").expect("rmdir failed");
    disk.delete(&mut store,"DOCS").expect("rmdir failed");
    assert!(disk.tree(&store).expect("walk failed").is_empty());
}

#[test]
fn amiga_nested_directories() {
    for kind in [FormatKind::AmigaOfs,FormatKind::AmigaFfs] {
        let (mut store,disk) = formatted(kind);
        disk.create_dir(&mut store,"Work").expect("mkdir failed");
        disk.create_dir(&mut store,"Work/Sub").expect("nested mkdir failed");
        let content = vec![0x32u8;1500];
        disk.write_file(&mut store,"Work/Sub/notes",&DirItemAttr::default(),&content).expect("write failed");
        assert_eq!(disk.read_file(&store,"Work/Sub/notes").expect("read failed"),content);
        disk.rename(&mut store,"Work/Sub/notes","memo").expect("rename failed");
        assert!(disk.read_file(&store,"Work/Sub/notes").is_err());
        assert_eq!(disk.read_file(&store,"Work/Sub/memo").expect("read failed"),content);
        assert!(disk.delete(&mut store,"Work").is_err());
        disk.delete(&mut store,"Work/Sub/memo").expect("delete failed");
        disk.delete(&mut store,"Work/Sub").expect("rmdir failed");
        disk.delete(&mut store,"Work").expect("rmdir failed");
        assert!(disk.tree(&store).expect("walk failed").is_empty());
    }
}

#[test]
fn hfs_nested_directories() {
    let (mut store,disk) = formatted(FormatKind::Hfs);
    disk.create_dir(&mut store,"Folder").expect("mkdir failed");
    disk.create_dir(&mut store,"Folder/Inner").expect("nested mkdir failed");
    let content = vec![0x33u8;900];
    disk.write_file(&mut store,"Folder/Inner/ReadMe",&DirItemAttr::default(),&content).expect("write failed");
    let items = disk.list(&store,"Folder/Inner").expect("catalog failed");
    assert_eq!(items.len(),1);
    assert_eq!(items[0].size,900);
    assert!(disk.delete(&mut store,"Folder/Inner").is_err());
    disk.delete(&mut store,"Folder/Inner/ReadMe").expect("delete failed");
    disk.delete(&mut store,"Folder/Inner").expect("rmdir failed");
    disk.delete(&mut store,"Folder").expect("rmdir failed");
    assert!(disk.tree(&store).expect("walk failed").is_empty());
}
