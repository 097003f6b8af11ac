//! ### Format Template Registry
//!
//! Named per-format defaults consulted when a disk's self-description is
//! absent or overridden by the caller: geometry, sector numbering
//! convention, skew parameters, and fill bytes.  The core only reads from
//! this table; callers may construct their own `FormatTemplate` to probe
//! non-canonical media.

use crate::chs::{Translator,TrackZone,SideOrder,SectorNumbering,SkewSpec};
use crate::store::{MemStore,Zone};
use super::FormatKind;

/// Skew table for native 8 inch CP/M v1 disks, logical to physical, 0-based
pub const CPM_1_SKEW: [usize;26] = [0,6,12,18,24,4,10,16,22,2,8,14,20,1,7,13,19,25,5,11,17,23,3,9,15,21];
/// Translate Apple DOS 3.3 logical sector to physical sector
pub const DOS_LSEC_TO_PSEC: [usize;16] = [0,13,11,9,7,5,3,1,14,12,10,8,6,4,2,15];
/// C1541 zone table: sectors per track thin out toward the hub
pub const C1541_ZONES: [TrackZone;4] = [
    TrackZone {track_start: 0, track_end: 17, sectors: 21},
    TrackZone {track_start: 17, track_end: 24, sectors: 19},
    TrackZone {track_start: 24, track_end: 30, sectors: 18},
    TrackZone {track_start: 30, track_end: 35, sectors: 17}
];

/// Per-format default parameters
#[derive(Clone)]
pub struct FormatTemplate {
    pub kind: FormatKind,
    pub tracks: usize,
    pub sides: usize,
    /// ignored when `zones` is present
    pub sectors: usize,
    pub sector_size: usize,
    pub zones: Option<Vec<TrackZone>>,
    pub sector_base: usize,
    pub divs: u8,
    pub side_order: SideOrder,
    pub numbering: SectorNumbering,
    pub reverse_sides: bool,
    pub skew: SkewSpec,
    /// byte the formatter writes into data sectors
    pub data_fill: u8,
    /// byte the formatter writes into directory sectors
    pub dir_fill: u8
}

impl FormatTemplate {
    pub fn translator(&self) -> Result<Translator,crate::chs::Error> {
        let zones = match &self.zones {
            Some(z) => z.clone(),
            None => vec![TrackZone {track_start: 0, track_end: self.tracks, sectors: self.sectors}]
        };
        Translator::with_zones(&zones,self.sides,self.sector_base,self.divs,
            self.side_order,self.numbering,self.reverse_sides,self.skew.clone())
    }
    /// Fresh in-memory store with this geometry, filled with the data byte.
    pub fn blank_store(&self) -> MemStore {
        match &self.zones {
            Some(zones) => {
                let store_zones: Vec<Zone> = zones.iter().map(|z| Zone {
                    track_start: z.track_start,
                    track_end: z.track_end,
                    sectors: z.sectors,
                    sector_size: self.sector_size
                }).collect();
                MemStore::zoned(&store_zones,self.sides,self.data_fill)
            },
            None => MemStore::new(self.tracks,self.sides,self.sectors,self.sector_size,self.data_fill)
        }
    }
}

/// Canonical template for a format variant.
pub fn template(kind: FormatKind) -> FormatTemplate {
    let base = FormatTemplate {
        kind,
        tracks: 40,
        sides: 2,
        sectors: 16,
        sector_size: 256,
        zones: None,
        sector_base: 1,
        divs: 1,
        side_order: SideOrder::Cylinders,
        numbering: SectorNumbering::PerSide,
        reverse_sides: false,
        skew: SkewSpec::None,
        data_fill: 0xff,
        dir_fill: 0xff
    };
    match kind {
        // PC-8801 2D
        FormatKind::Fat8 => base,
        // 360K 5.25 inch
        FormatKind::Fat12 => FormatTemplate {
            tracks: 40, sides: 2, sectors: 9, sector_size: 512,
            data_fill: 0xf6, dir_fill: 0x00,
            ..base
        },
        FormatKind::AppleDos => FormatTemplate {
            tracks: 35, sides: 1, sectors: 16, sector_base: 0,
            skew: SkewSpec::Table {read: DOS_LSEC_TO_PSEC.to_vec(), save: DOS_LSEC_TO_PSEC.to_vec()},
            data_fill: 0x00, dir_fill: 0x00,
            ..base
        },
        FormatKind::C1541 => FormatTemplate {
            tracks: 35, sides: 1, sector_base: 0,
            zones: Some(C1541_ZONES.to_vec()),
            skew: SkewSpec::Stride {read: 1, save: 10},
            data_fill: 0x01, dir_fill: 0x00,
            ..base
        },
        FormatKind::Flex => FormatTemplate {
            tracks: 35, sides: 1, sectors: 10,
            numbering: SectorNumbering::PerCylinder,
            data_fill: 0x00, dir_fill: 0x00,
            ..base
        },
        FormatKind::Trsdos13 => FormatTemplate {
            tracks: 40, sides: 1, sectors: 18, sector_base: 0,
            data_fill: 0x00, dir_fill: 0x00,
            ..base
        },
        FormatKind::Trsdos2x => FormatTemplate {
            tracks: 35, sides: 1, sectors: 10, sector_base: 0,
            data_fill: 0x00, dir_fill: 0x00,
            ..base
        },
        FormatKind::AmigaOfs | FormatKind::AmigaFfs => FormatTemplate {
            tracks: 80, sides: 2, sectors: 11, sector_size: 512, sector_base: 0,
            data_fill: 0x00, dir_fill: 0x00,
            ..base
        },
        // 800K, addressed as 512 byte blocks
        FormatKind::Hfs => FormatTemplate {
            tracks: 80, sides: 2, sectors: 10, sector_size: 512, sector_base: 0,
            data_fill: 0x00, dir_fill: 0x00,
            ..base
        },
        // 8 inch SSSD, the CP/M v1 reference geometry
        FormatKind::Cpm => FormatTemplate {
            tracks: 77, sides: 1, sectors: 26, sector_size: 128,
            skew: SkewSpec::Table {read: CPM_1_SKEW.to_vec(), save: CPM_1_SKEW.to_vec()},
            data_fill: 0xe5, dir_fill: 0xe5,
            ..base
        },
        FormatKind::MzBasic => FormatTemplate {
            tracks: 40, sides: 2, sectors: 16, sector_size: 256,
            data_fill: 0x00, dir_fill: 0x00,
            ..base
        },
        FormatKind::Cdos => FormatTemplate {
            tracks: 40, sides: 2, sectors: 16, sector_size: 256,
            data_fill: 0x00, dir_fill: 0x00,
            ..base
        }
    }
}

/// Every canonical template, in detection priority order.
pub fn all() -> Vec<FormatTemplate> {
    [
        FormatKind::AppleDos,
        FormatKind::Fat12,
        FormatKind::Fat8,
        FormatKind::C1541,
        FormatKind::AmigaOfs,
        FormatKind::AmigaFfs,
        FormatKind::Hfs,
        FormatKind::Flex,
        FormatKind::Trsdos13,
        FormatKind::Trsdos2x,
        FormatKind::MzBasic,
        FormatKind::Cdos,
        FormatKind::Cpm
    ].iter().map(|k| template(*k)).collect()
}
