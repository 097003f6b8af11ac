//! ## Sector Store Module
//!
//! The file system layer does not read image files itself.  It consumes a
//! `SectorStore` trait object, an addressable pool of fixed-size sector
//! buffers grouped into tracks and sides.  Anything that can serve sectors
//! by position can back a file system: an image decoder, an emulator, or
//! the in-memory `MemStore` provided here.
//!
//! Sector indices at this level are always physical and count from 0.
//! Sector id conventions (numbering from 1, skew, side folding) are the
//! business of `crate::chs`.

use log::error;
use crate::{DYNERR,STDRESULT};

/// Enumerates sector store errors.  The `Display` trait will print the equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("geometric coordinate out of range")]
    GeometryMismatch,
    #[error("unable to access sector")]
    SectorAccess
}

/// Contract between a file system and its storage.
/// Implementations own the raw bytes; file systems only borrow them
/// for the duration of one operation.
pub trait SectorStore {
    /// tracks per side
    fn track_count(&self) -> usize;
    /// sides per disk
    fn side_count(&self) -> usize;
    /// sectors on the given track, 0 if out of range
    fn sector_count(&self,track: usize,side: usize) -> usize;
    /// bytes per sector on the given track
    fn sector_size(&self,track: usize,side: usize) -> usize;
    /// Read the sector at the given physical position, sectors counting from 0.
    fn read_sector(&self,track: usize,side: usize,sector: usize) -> Result<Vec<u8>,DYNERR>;
    /// Write the sector at the given physical position.  If `dat` is shorter
    /// than the sector the trailing bytes are unaffected.
    fn write_sector(&mut self,track: usize,side: usize,sector: usize,dat: &[u8]) -> STDRESULT;
}

/// Track layout used by `MemStore`: a run of consecutive tracks sharing
/// a sector count and size.  Zoned disks (C1541, 3.5 inch) use several.
#[derive(Clone,Copy)]
pub struct Zone {
    pub track_start: usize,
    pub track_end: usize,
    pub sectors: usize,
    pub sector_size: usize
}

/// Simple in-memory sector store.  Backs freshly formatted disks and tests.
pub struct MemStore {
    sides: usize,
    zones: Vec<Zone>,
    /// indexed by [side][track], each sector is its own vector
    data: Vec<Vec<Vec<Vec<u8>>>>
}

impl MemStore {
    /// Store with the same sector count and size on every track.
    pub fn new(tracks: usize,sides: usize,sectors: usize,sector_size: usize,fill: u8) -> Self {
        Self::zoned(&[Zone {track_start: 0, track_end: tracks, sectors, sector_size}],sides,fill)
    }
    /// Store with zoned geometry.  Zones must be contiguous and ascending.
    pub fn zoned(zones: &[Zone],sides: usize,fill: u8) -> Self {
        let mut data = Vec::new();
        for _side in 0..sides {
            let mut side_data = Vec::new();
            for z in zones {
                for _trk in z.track_start..z.track_end {
                    let mut track_data = Vec::new();
                    for _sec in 0..z.sectors {
                        track_data.push(vec![fill;z.sector_size]);
                    }
                    side_data.push(track_data);
                }
            }
            data.push(side_data);
        }
        Self {
            sides,
            zones: zones.to_vec(),
            data
        }
    }
    fn zone_of(&self,track: usize) -> Option<&Zone> {
        self.zones.iter().find(|z| track >= z.track_start && track < z.track_end)
    }
}

impl SectorStore for MemStore {
    fn track_count(&self) -> usize {
        match self.zones.last() {
            Some(z) => z.track_end,
            None => 0
        }
    }
    fn side_count(&self) -> usize {
        self.sides
    }
    fn sector_count(&self,track: usize,_side: usize) -> usize {
        match self.zone_of(track) {
            Some(z) => z.sectors,
            None => 0
        }
    }
    fn sector_size(&self,track: usize,_side: usize) -> usize {
        match self.zone_of(track) {
            Some(z) => z.sector_size,
            None => 0
        }
    }
    fn read_sector(&self,track: usize,side: usize,sector: usize) -> Result<Vec<u8>,DYNERR> {
        if side >= self.sides || track >= self.track_count() || sector >= self.sector_count(track,side) {
            error!("read request t{} s{} sec{} is outside disk bounds",track,side,sector);
            return Err(Box::new(Error::GeometryMismatch));
        }
        Ok(self.data[side][track][sector].clone())
    }
    fn write_sector(&mut self,track: usize,side: usize,sector: usize,dat: &[u8]) -> STDRESULT {
        if side >= self.sides || track >= self.track_count() || sector >= self.sector_count(track,side) {
            error!("write request t{} s{} sec{} is outside disk bounds",track,side,sector);
            return Err(Box::new(Error::GeometryMismatch));
        }
        let sec = &mut self.data[side][track][sector];
        let actual_len = usize::min(dat.len(),sec.len());
        sec[0..actual_len].copy_from_slice(&dat[0..actual_len]);
        Ok(())
    }
}

/// Read a sector and update only the byte range `[offset,offset+patch.len())`,
/// then write it back.  Saves every caller the read-modify-write dance.
pub fn patch_sector(store: &mut dyn SectorStore,track: usize,side: usize,sector: usize,offset: usize,patch: &[u8]) -> STDRESULT {
    let mut buf = store.read_sector(track,side,sector)?;
    if offset + patch.len() > buf.len() {
        return Err(Box::new(Error::SectorAccess));
    }
    buf[offset..offset+patch.len()].copy_from_slice(patch);
    store.write_sector(track,side,sector,&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn zoned_geometry() {
        let zones = [
            Zone {track_start: 0, track_end: 17, sectors: 21, sector_size: 256},
            Zone {track_start: 17, track_end: 24, sectors: 19, sector_size: 256},
            Zone {track_start: 24, track_end: 30, sectors: 18, sector_size: 256},
            Zone {track_start: 30, track_end: 35, sectors: 17, sector_size: 256}
        ];
        let store = MemStore::zoned(&zones,1,0);
        assert_eq!(store.track_count(),35);
        assert_eq!(store.sector_count(0,0),21);
        assert_eq!(store.sector_count(17,0),19);
        assert_eq!(store.sector_count(34,0),17);
        assert_eq!(store.sector_count(35,0),0);
    }
    #[test]
    fn patch_respects_bounds() {
        let mut store = MemStore::new(35,1,16,256,0);
        patch_sector(&mut store,1,0,2,250,&[1,2,3,4,5,6]).expect("patch failed");
        assert!(patch_sector(&mut store,1,0,2,251,&[1,2,3,4,5,6]).is_err());
        let buf = store.read_sector(1,0,2).expect("read failed");
        assert_eq!(buf[250..256],[1,2,3,4,5,6]);
    }
}
