//! ## Sector Addressing Module
//!
//! Every file system variant addresses storage through a flat "sector
//! position": track 0, side 0, first sector is position 0.  The
//! `Translator` turns positions into physical (track, side, sector,
//! sub-division) tuples and back, absorbing all the per-format numbering
//! conventions: variable sectors per track, sector ids counting from 0 or
//! 1, ids restarting per side or running across both sides of a cylinder,
//! side-major vs. cylinder-major folding, inverted head order, and the
//! read/save skew permutations.
//!
//! All tables are built once from a `FormatTemplate` or from the image
//! geometry; after that everything here is pure arithmetic with no I/O.

use log::error;

/// Enumerates addressing errors.  The `Display` trait will print the equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("sector position out of range")]
    PositionRange,
    #[error("physical address out of range")]
    AddressRange,
    #[error("skew table is inconsistent")]
    BadSkewTable
}

/// Order in which sides are folded into the flat position sequence
#[derive(Clone,Copy,PartialEq,Eq)]
pub enum SideOrder {
    /// positions visit both sides of a cylinder before the next track
    Cylinders,
    /// positions visit every track of side 0, then every track of side 1
    Sides
}

/// Convention for sector ids on two-sided disks
#[derive(Clone,Copy,PartialEq,Eq)]
pub enum SectorNumbering {
    /// ids restart at the base on each side
    PerSide,
    /// ids continue across sides of a cylinder (FLEX style)
    PerCylinder
}

/// How the logical-to-physical sector permutation is obtained
#[derive(Clone)]
pub enum SkewSpec {
    None,
    /// explicit tables, physical = table[logical], 0-based
    Table { read: Vec<usize>, save: Vec<usize> },
    /// generated from a stride, separately for read and save
    Stride { read: usize, save: usize }
}

/// A run of consecutive tracks sharing one sector count
#[derive(Clone,Copy)]
pub struct TrackZone {
    pub track_start: usize,
    pub track_end: usize,
    pub sectors: usize
}

/// Physical disk address plus sub-division coordinates
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub struct Chs {
    pub track: usize,
    pub side: usize,
    /// sector id in the format's own numbering
    pub sector: usize,
    pub div: u8,
    pub div_count: u8
}

struct ZoneSkew {
    read_l2p: Vec<usize>,
    read_p2l: Vec<usize>,
    save_l2p: Vec<usize>
}

/// Build a skew map from a stride: step by `stride` physical slots per
/// logical sector, bumping forward past already-used slots.
fn stride_map(secs: usize,stride: usize) -> Vec<usize> {
    let mut map = vec![0;secs];
    let mut used = vec![false;secs];
    let mut pos = 0;
    for lsec in 0..secs {
        while used[pos] {
            pos = (pos+1) % secs;
        }
        map[lsec] = pos;
        used[pos] = true;
        pos = (pos + stride) % secs;
    }
    map
}

fn invert_map(l2p: &[usize]) -> Result<Vec<usize>,Error> {
    let mut p2l = vec![usize::MAX;l2p.len()];
    for (lsec,psec) in l2p.iter().enumerate() {
        if *psec >= l2p.len() || p2l[*psec] != usize::MAX {
            return Err(Error::BadSkewTable);
        }
        p2l[*psec] = lsec;
    }
    Ok(p2l)
}

/// Converts flat sector positions to physical addresses and back.
pub struct Translator {
    sides: usize,
    zones: Vec<TrackZone>,
    /// flat position of the first sector of each zone, cylinder-major only
    zone_pos: Vec<usize>,
    skews: Vec<ZoneSkew>,
    sector_base: usize,
    divs: u8,
    side_order: SideOrder,
    numbering: SectorNumbering,
    reverse_sides: bool
}

impl Translator {
    /// Translator for a uniform disk, most formats use this.
    pub fn new(tracks: usize,sides: usize,sectors: usize,sector_base: usize,divs: u8,skew: SkewSpec) -> Result<Self,Error> {
        Self::with_zones(&[TrackZone {track_start: 0,track_end: tracks,sectors}],sides,sector_base,divs,
            SideOrder::Cylinders,SectorNumbering::PerSide,false,skew)
    }
    /// Fully specified translator, `zones` must be contiguous and ascending.
    pub fn with_zones(zones: &[TrackZone],sides: usize,sector_base: usize,divs: u8,
            side_order: SideOrder,numbering: SectorNumbering,reverse_sides: bool,skew: SkewSpec) -> Result<Self,Error> {
        let mut skews = Vec::new();
        let mut zone_pos = Vec::new();
        let mut pos = 0;
        for z in zones {
            let read_l2p = match &skew {
                SkewSpec::None => (0..z.sectors).collect(),
                SkewSpec::Table {read,..} => {
                    if read.len() != z.sectors {
                        return Err(Error::BadSkewTable);
                    }
                    read.clone()
                },
                SkewSpec::Stride {read,..} => stride_map(z.sectors,*read)
            };
            let save_l2p = match &skew {
                SkewSpec::None => (0..z.sectors).collect(),
                SkewSpec::Table {save,..} => {
                    if save.len() != z.sectors {
                        return Err(Error::BadSkewTable);
                    }
                    save.clone()
                },
                SkewSpec::Stride {save,..} => stride_map(z.sectors,*save)
            };
            let read_p2l = invert_map(&read_l2p)?;
            invert_map(&save_l2p)?;
            skews.push(ZoneSkew {read_l2p,read_p2l,save_l2p});
            zone_pos.push(pos);
            pos += (z.track_end - z.track_start) * z.sectors * sides * divs as usize;
        }
        Ok(Self {
            sides,
            zones: zones.to_vec(),
            zone_pos,
            skews,
            sector_base,
            divs,
            side_order,
            numbering,
            reverse_sides
        })
    }
    /// total count of flat positions on the disk
    pub fn positions(&self) -> usize {
        match (self.zones.last(),self.zone_pos.last()) {
            (Some(z),Some(p)) => p + (z.track_end - z.track_start) * z.sectors * self.sides * self.divs as usize,
            _ => 0
        }
    }
    pub fn track_count(&self) -> usize {
        match self.zones.last() {
            Some(z) => z.track_end,
            None => 0
        }
    }
    pub fn side_count(&self) -> usize {
        self.sides
    }
    pub fn divs_per_sector(&self) -> u8 {
        self.divs
    }
    /// sectors on the given track
    pub fn sectors(&self,track: usize) -> usize {
        match self.zone_of(track) {
            Some(i) => self.zones[i].sectors,
            None => 0
        }
    }
    fn zone_of(&self,track: usize) -> Option<usize> {
        self.zones.iter().position(|z| track >= z.track_start && track < z.track_end)
    }
    /// decompose a flat position into (track, side, logical sector, div)
    fn decompose(&self,pos: usize) -> Result<(usize,usize,usize,u8),Error> {
        if pos >= self.positions() {
            return Err(Error::PositionRange);
        }
        let divs = self.divs as usize;
        match self.side_order {
            SideOrder::Cylinders => {
                let zone = match self.zone_pos.iter().rposition(|p| pos >= *p) {
                    Some(i) => i,
                    None => return Err(Error::PositionRange)
                };
                let z = &self.zones[zone];
                let rel = pos - self.zone_pos[zone];
                let per_cyl = z.sectors * self.sides * divs;
                let track = z.track_start + rel / per_cyl;
                let rem = rel % per_cyl;
                let side = rem / (z.sectors * divs);
                let rem = rem % (z.sectors * divs);
                Ok((track,side,rem / divs,(rem % divs) as u8))
            },
            SideOrder::Sides => {
                let per_side = self.positions() / self.sides;
                let side = pos / per_side;
                let mut rel = pos % per_side;
                for z in &self.zones {
                    let span = (z.track_end - z.track_start) * z.sectors * divs;
                    if rel < span {
                        let track = z.track_start + rel / (z.sectors * divs);
                        let rem = rel % (z.sectors * divs);
                        return Ok((track,side,rem / divs,(rem % divs) as u8));
                    }
                    rel -= span;
                }
                Err(Error::PositionRange)
            }
        }
    }
    fn compose(&self,track: usize,side: usize,lsec: usize,div: u8) -> Result<usize,Error> {
        let divs = self.divs as usize;
        let zone = match self.zone_of(track) {
            Some(i) => i,
            None => return Err(Error::AddressRange)
        };
        let z = &self.zones[zone];
        if side >= self.sides || lsec >= z.sectors || div >= self.divs {
            return Err(Error::AddressRange);
        }
        match self.side_order {
            SideOrder::Cylinders => {
                let per_cyl = z.sectors * self.sides * divs;
                Ok(self.zone_pos[zone] + (track - z.track_start)*per_cyl + side*z.sectors*divs + lsec*divs + div as usize)
            },
            SideOrder::Sides => {
                let per_side = self.positions() / self.sides;
                let mut rel = 0;
                for zz in &self.zones[0..zone] {
                    rel += (zz.track_end - zz.track_start) * zz.sectors * divs;
                }
                Ok(side*per_side + rel + (track - z.track_start)*z.sectors*divs + lsec*divs + div as usize)
            }
        }
    }
    fn apply_side(&self,side: usize) -> usize {
        match self.reverse_sides {
            true => self.sides - 1 - side,
            false => side
        }
    }
    fn sector_id(&self,track: usize,side: usize,psec: usize) -> usize {
        match self.numbering {
            SectorNumbering::PerSide => self.sector_base + psec,
            SectorNumbering::PerCylinder => self.sector_base + psec + side*self.sectors(track)
        }
    }
    /// Physical address of a flat position using the read skew.
    pub fn to_physical(&self,pos: usize) -> Result<Chs,Error> {
        self.physical(pos,false)
    }
    /// Physical address of a flat position using the save skew.  Some formats
    /// deliberately skew differently on write to cut seek latency.
    pub fn to_physical_for_save(&self,pos: usize) -> Result<Chs,Error> {
        self.physical(pos,true)
    }
    fn physical(&self,pos: usize,save: bool) -> Result<Chs,Error> {
        let (track,side,lsec,div) = self.decompose(pos)?;
        let zone = self.zone_of(track).ok_or(Error::AddressRange)?;
        let psec = match save {
            false => self.skews[zone].read_l2p[lsec],
            true => self.skews[zone].save_l2p[lsec]
        };
        Ok(Chs {
            track,
            side: self.apply_side(side),
            sector: self.sector_id(track,side,psec),
            div,
            div_count: self.divs
        })
    }
    /// Flat position of a physical address, inverse of `to_physical`.
    pub fn to_logical(&self,track: usize,side: usize,sector: usize,div: u8) -> Result<usize,Error> {
        let side = self.apply_side(side);
        let secs = self.sectors(track);
        if secs == 0 || sector < self.sector_base {
            return Err(Error::AddressRange);
        }
        let mut psec = sector - self.sector_base;
        if self.numbering == SectorNumbering::PerCylinder {
            psec -= side * secs;
        }
        if psec >= secs {
            return Err(Error::AddressRange);
        }
        let zone = self.zone_of(track).ok_or(Error::AddressRange)?;
        let lsec = self.skews[zone].read_p2l[psec];
        self.compose(track,side,lsec,div)
    }
    /// Fold a track-side pair into a single ascending track sequence,
    /// honoring the side order and side reversal of this format.
    pub fn to_logical_flat(&self,track: usize,side: usize) -> Result<usize,Error> {
        let side = self.apply_side(side);
        if track >= self.track_count() || side >= self.sides {
            return Err(Error::AddressRange);
        }
        match self.side_order {
            SideOrder::Cylinders => Ok(track*self.sides + side),
            SideOrder::Sides => Ok(side*self.track_count() + track)
        }
    }
    /// Store coordinates (track, side, 0-based sector index) for a flat
    /// position, read skew applied.  This is what the allocation strategies
    /// feed to `SectorStore`.
    pub fn store_coords(&self,pos: usize) -> Result<(usize,usize,usize),Error> {
        let (track,side,lsec,_div) = self.decompose(pos)?;
        let zone = self.zone_of(track).ok_or(Error::AddressRange)?;
        Ok((track,self.apply_side(side),self.skews[zone].read_l2p[lsec]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn stride_map_matches_reference() {
        // C1541 data interleave of 10 on a 21 sector track
        let map = stride_map(21,10);
        assert_eq!(map[0..5],[0,10,20,9,19]);
        // stride 2 on 16 sectors wraps with the bump rule
        let map = stride_map(16,2);
        assert_eq!(map,[0,2,4,6,8,10,12,14,1,3,5,7,9,11,13,15]);
    }
    #[test]
    fn round_trip_uniform() {
        let x = Translator::new(35,1,16,0,1,SkewSpec::Stride {read: 2,save: 2}).expect("bad translator");
        for pos in 0..x.positions() {
            let chs = x.to_physical(pos).expect("range");
            assert_eq!(x.to_logical(chs.track,chs.side,chs.sector,chs.div).expect("range"),pos);
        }
    }
    #[test]
    fn round_trip_zoned_two_sided() {
        let zones = [
            TrackZone {track_start: 0,track_end: 17,sectors: 21},
            TrackZone {track_start: 17,track_end: 24,sectors: 19},
            TrackZone {track_start: 24,track_end: 35,sectors: 17}
        ];
        for order in [SideOrder::Cylinders,SideOrder::Sides] {
            let x = Translator::with_zones(&zones,2,1,1,order,SectorNumbering::PerSide,false,SkewSpec::None)
                .expect("bad translator");
            for pos in 0..x.positions() {
                let chs = x.to_physical(pos).expect("range");
                assert_eq!(x.to_logical(chs.track,chs.side,chs.sector,chs.div).expect("range"),pos);
            }
        }
    }
    #[test]
    fn per_cylinder_numbering() {
        // FLEX style: two-sided, sector ids 1..=20 run across both sides
        let x = Translator::with_zones(&[TrackZone {track_start: 0,track_end: 35,sectors: 10}],
            2,1,1,SideOrder::Cylinders,SectorNumbering::PerCylinder,false,SkewSpec::None).expect("bad translator");
        let chs = x.to_physical(10).expect("range");
        assert_eq!((chs.track,chs.side,chs.sector),(0,1,11));
        assert_eq!(x.to_logical(0,1,11,0).expect("range"),10);
    }
    #[test]
    fn sub_divisions() {
        let x = Translator::new(35,1,16,0,2,SkewSpec::None).expect("bad translator");
        let chs = x.to_physical(33).expect("range");
        assert_eq!((chs.track,chs.sector,chs.div,chs.div_count),(1,0,1,2));
        assert_eq!(x.to_logical(1,0,0,1).expect("range"),33);
    }
    #[test]
    fn side_reversal() {
        let x = Translator::with_zones(&[TrackZone {track_start: 0,track_end: 40,sectors: 16}],
            2,0,1,SideOrder::Cylinders,SectorNumbering::PerSide,true,SkewSpec::None).expect("bad translator");
        let chs = x.to_physical(0).expect("range");
        assert_eq!(chs.side,1);
        assert_eq!(x.to_logical(0,1,0,0).expect("range"),0);
    }
    #[test]
    fn save_skew_differs() {
        let x = Translator::new(35,1,16,0,1,SkewSpec::Stride {read: 1,save: 2}).expect("bad translator");
        assert_eq!(x.to_physical(2).expect("range").sector,2);
        assert_eq!(x.to_physical_for_save(2).expect("range").sector,4);
    }
}
