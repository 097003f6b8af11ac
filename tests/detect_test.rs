// full stack detection on freshly formatted images
use retrofs::FileSystem;
use retrofs::fs::{templates,detect,FormatKind,DirItemAttr};
use retrofs::store::MemStore;

fn formatted(kind: FormatKind) -> MemStore {
    let _ = env_logger::builder().is_test(true).try_init();
    let t = templates::template(kind);
    let mut store = t.blank_store();
    let mut disk = FileSystem::with_kind(kind).expect("bad template");
    disk.format(&mut store,"DETECT",42).expect("format failed");
    store
}

#[test]
fn open_binds_every_signed_format() {
    for kind in [FormatKind::Fat8,FormatKind::Fat12,FormatKind::AppleDos,FormatKind::C1541,
                 FormatKind::AmigaOfs,FormatKind::AmigaFfs,FormatKind::Hfs,
                 FormatKind::Flex,FormatKind::Trsdos13,FormatKind::Cpm] {
        let store = formatted(kind);
        let disk = FileSystem::open(&store).expect("no candidate");
        assert_eq!(disk.kind(),kind);
    }
}

#[test]
fn weakly_signed_formats_survive_scoring() {
    // these carry no magic number, so only membership is promised
    for kind in [FormatKind::Trsdos2x,FormatKind::MzBasic,FormatKind::Cdos] {
        let store = formatted(kind);
        let all = detect::scores(&store);
        assert!(all.iter().any(|d| d.kind == kind),"{} not among candidates",kind);
    }
}

#[test]
fn detection_still_works_on_a_populated_disk() {
    let mut store = formatted(FormatKind::Flex);
    let mut disk = FileSystem::open(&store).expect("no candidate");
    for (name,len) in [("ONE.TXT",300usize),("TWO.TXT",700)] {
        disk.write_file(&mut store,name,&DirItemAttr::default(),&vec![0x44u8;len]).expect("write failed");
    }
    disk = FileSystem::open(&store).expect("no candidate after writes");
    assert_eq!(disk.kind(),FormatKind::Flex);
    assert_eq!(disk.list(&store,"").expect("catalog failed").len(),2);
}

#[test]
fn unformatted_images_never_score_high() {
    // bitmap only formats may survive a blank image, but never strongly
    let zeroed = MemStore::new(40,2,16,256,0x00);
    for d in detect::scores(&zeroed) {
        assert!(d.score < 0.9,"{} scored {}",d.kind,d.score);
    }
    let noisy = MemStore::new(35,1,16,256,0xa7);
    for d in detect::scores(&noisy) {
        assert!(d.score < 0.9,"{} scored {}",d.kind,d.score);
    }
}

#[test]
fn geometry_gates_the_candidate_list() {
    // an Apple sized image can only ever match Apple candidates
    let store = MemStore::new(35,1,16,256,0x00);
    for d in detect::scores(&store) {
        assert_eq!(d.kind,FormatKind::AppleDos);
    }
}
