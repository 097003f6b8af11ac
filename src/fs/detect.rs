//! ### Format detection
//!
//! Every canonical template is probed against the raw sectors in three
//! stages: structural signature check, geometry parse, and the directory
//! printability score.  A negative score at any stage disqualifies the
//! candidate; the best surviving score wins.  Probes are read-only and
//! build short-lived allocator/codec values per candidate.

use log::{info,debug};
use crate::store::SectorStore;
use super::templates::{self,FormatTemplate};
use super::alloc::Allocator;
use super::entry::EntryCodec;
use super::{dir,FormatKind};

/// One scored candidate.
pub struct Detection {
    pub kind: FormatKind,
    pub score: f64,
    pub template: FormatTemplate
}

/// cheap geometry gate before any sector content is inspected
fn geometry_matches(store: &dyn SectorStore,t: &FormatTemplate) -> bool {
    if store.track_count() != t.tracks || store.side_count() != t.sides {
        return false;
    }
    if store.sector_size(0,0) != t.sector_size {
        return false;
    }
    match &t.zones {
        Some(zones) => zones.iter().all(|z| store.sector_count(z.track_start,0) == z.sectors),
        None => store.sector_count(0,0) == t.sectors
    }
}

/// Score a single candidate, negative when disqualified.
pub fn score_candidate(store: &dyn SectorStore,t: &FormatTemplate) -> f64 {
    if !geometry_matches(store,t) {
        return -1.0;
    }
    let xlat = match t.translator() {
        Ok(x) => x,
        Err(_) => return -1.0
    };
    let mut alloc = Allocator::open(t.kind,xlat);
    let structural = alloc.check_consistency(store,false);
    if structural < 0.0 {
        return -1.0;
    }
    let geometry = alloc.parse_geometry(store,false);
    if geometry < 0.0 {
        return -1.0;
    }
    let codec = EntryCodec::new(t.kind);
    let list = match alloc.root_groups(store) {
        Ok(l) => l,
        Err(_) => return -1.0
    };
    let directory = dir::check_directory(store,&alloc,&codec,true,&list);
    if directory < 0.0 {
        return -1.0;
    }
    (structural + geometry + directory) / 3.0
}

/// Every candidate that survives all three stages, best first.
pub fn scores(store: &dyn SectorStore) -> Vec<Detection> {
    let mut ans = Vec::new();
    for t in templates::all() {
        let score = score_candidate(store,&t);
        if score >= 0.0 {
            debug!("{} scored {}",t.kind,score);
            ans.push(Detection {kind: t.kind, score, template: t});
        }
    }
    ans.sort_by(|a,b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ans
}

/// The winning format, if any candidate survives.
pub fn detect(store: &dyn SectorStore) -> Option<Detection> {
    let mut all = scores(store);
    match all.is_empty() {
        true => {
            info!("no format candidate survived");
            None
        },
        false => {
            let best = all.remove(0);
            info!("detected {} with score {}",best.kind,best.score);
            Some(best)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formatted(kind: FormatKind) -> crate::store::MemStore {
        let t = templates::template(kind);
        let mut store = t.blank_store();
        let mut alloc = Allocator::open(kind,t.translator().expect("bad translator"));
        alloc.format_disk(&mut store,"DETECT",11).expect("format failed");
        store
    }
    #[test]
    fn formatted_disks_are_recognized() {
        for kind in [FormatKind::Fat8,FormatKind::Fat12,FormatKind::AppleDos,FormatKind::C1541,
                     FormatKind::Flex,FormatKind::Trsdos13,FormatKind::Hfs,FormatKind::Cpm] {
            let store = formatted(kind);
            let best = detect(&store).expect("no candidate");
            assert_eq!(best.kind,kind);
        }
    }
    #[test]
    fn amiga_flavors_are_told_apart() {
        for kind in [FormatKind::AmigaOfs,FormatKind::AmigaFfs] {
            let store = formatted(kind);
            let best = detect(&store).expect("no candidate");
            assert_eq!(best.kind,kind);
        }
    }
    #[test]
    fn zeroed_image_is_rejected() {
        let store = crate::store::MemStore::new(40,2,16,256,0x00);
        for d in scores(&store) {
            // nothing with a signature should survive; weak bitmap
            // formats may, but never strongly
            assert!(d.score < 0.9,"{} scored {}",d.kind,d.score);
        }
    }
}
