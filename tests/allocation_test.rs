// allocation behavior shared by the chain and bitmap families
use retrofs::FileSystem;
use retrofs::fs::{self,templates,FormatKind,DirItemAttr};
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
fn zero_length_files_occupy_nothing() {
    for kind in [FormatKind::Fat12,FormatKind::Cpm,FormatKind::AmigaFfs] {
        let (mut store,disk) = formatted(kind);
        let before = disk.free(&store).expect("scan failed").free;
        disk.write_file(&mut store,"EMPTY.TXT",&DirItemAttr::default(),&[]).expect("write failed");
        assert_eq!(disk.free(&store).expect("scan failed").free,before,"{} took a group",kind);
        let info = disk.info(&store,"EMPTY.TXT").expect("no entry");
        assert_eq!(info.size,0,"{} size",kind);
        assert_eq!(disk.read_file(&store,"EMPTY.TXT").expect("read failed").len(),0);
        disk.delete(&mut store,"EMPTY.TXT").expect("delete failed");
        assert_eq!(disk.free(&store).expect("scan failed").free,before);
    }
}

#[test]
fn partial_tail_takes_a_whole_group() {
    // 3.5 groups of content must claim 4 groups on both formats
    for kind in [FormatKind::Fat12,FormatKind::Cpm] {
        let (mut store,disk) = formatted(kind);
        let before = disk.free(&store).expect("scan failed").free;
        let content: Vec<u8> = (0..3584).map(|i| (1 + i % 251) as u8).collect();
        disk.write_file(&mut store,"HALF.DAT",&DirItemAttr::default(),&content).expect("write failed");
        let after = disk.free(&store).expect("scan failed").free;
        assert_eq!(before - after,4,"{} group count",kind);
        assert_eq!(disk.read_file(&store,"HALF.DAT").expect("read failed"),content);
        disk.verify_file(&store,"HALF.DAT",&content).expect("verify failed");
    }
}

#[test]
fn full_disk_allocation_rolls_back() {
    for kind in [FormatKind::C1541,FormatKind::Fat8] {
        let (mut store,disk) = formatted(kind);
        let before = disk.free(&store).expect("scan failed").free;
        let big = vec![0x41u8;400_000];
        assert!(disk.write_file(&mut store,"HUGE",&DirItemAttr::default(),&big).is_err());
        assert_eq!(disk.free(&store).expect("scan failed").free,before,"{} leaked groups",kind);
        // the disk is still usable after the refusal
        disk.write_file(&mut store,"SMALL",&DirItemAttr::default(),&vec![0x42u8;5000]).expect("write failed");
        assert!(disk.read_file(&store,"SMALL").expect("read failed").len() >= 5000);
    }
}

#[test]
fn long_file_spills_into_second_index_sector() {
    // 123 data sectors exceed the 122 pairs of one track/sector list
    let (mut store,disk) = formatted(FormatKind::AppleDos);
    let before = disk.free(&store).expect("scan failed").free;
    let content: Vec<u8> = (0..123*256).map(|i| (1 + i % 251) as u8).collect();
    let mut item = DirItemAttr::default();
    item.common = fs::ASCII;
    disk.write_file(&mut store,"LONGTEXT",&item,&content).expect("write failed");
    let after = disk.free(&store).expect("scan failed").free;
    assert_eq!(before - after,125,"data plus two list sectors");
    assert_eq!(disk.read_file(&store,"LONGTEXT").expect("read failed"),content);
    disk.delete(&mut store,"LONGTEXT").expect("delete failed");
    assert_eq!(disk.free(&store).expect("scan failed").free,before);
}
