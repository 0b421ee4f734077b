//! iNES cartridge header
//!
//! Only the fields needed to pick an audio path are decoded; everything else
//! about the ROM is the emulator's business.

use crate::{ChiprollError, Result};
use nom::bytes::complete::{tag, take};
use nom::number::complete::u8 as byte;
use nom::IResult;

/// Header length in bytes.
pub const HEADER_LEN: usize = 16;
/// File magic.
pub const MAGIC: &[u8; 4] = b"NES\x1A";
/// Konami VRC6a.
pub const MAPPER_VRC6A: u16 = 24;
/// Konami VRC6b.
pub const MAPPER_VRC6B: u16 = 26;

/// Decoded iNES header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InesHeader {
    /// 16 KiB PRG-ROM banks
    pub prg_banks: u8,
    /// 8 KiB CHR-ROM banks
    pub chr_banks: u8,
    /// Flags 6: mirroring, battery, trainer, mapper low nibble
    pub flags6: u8,
    /// Flags 7: console type, NES 2.0 marker, mapper high nibble
    pub flags7: u8,
}

fn header(input: &[u8]) -> IResult<&[u8], InesHeader> {
    let (input, _) = tag(&MAGIC[..])(input)?;
    let (input, prg_banks) = byte(input)?;
    let (input, chr_banks) = byte(input)?;
    let (input, flags6) = byte(input)?;
    let (input, flags7) = byte(input)?;
    let (input, _) = take(8usize)(input)?;
    Ok((
        input,
        InesHeader {
            prg_banks,
            chr_banks,
            flags6,
            flags7,
        },
    ))
}

impl InesHeader {
    /// Parse the first 16 bytes of a ROM image.
    pub fn parse(rom: &[u8]) -> Result<Self> {
        if rom.len() < HEADER_LEN {
            return Err(ChiprollError::ParseError(format!(
                "ROM is {} bytes, shorter than the {}-byte iNES header",
                rom.len(),
                HEADER_LEN
            )));
        }
        header(rom)
            .map(|(_, h)| h)
            .map_err(|_| ChiprollError::ParseError("missing iNES magic".into()))
    }

    /// Mapper number from the two header nibbles.
    pub fn mapper(&self) -> u16 {
        u16::from(((self.flags6 & 0xF0) >> 4) | (self.flags7 & 0xF0))
    }

    /// True for the VRC6 mappers, which carry three extra sound channels.
    pub fn has_expansion_audio(&self) -> bool {
        matches!(self.mapper(), MAPPER_VRC6A | MAPPER_VRC6B)
    }

    /// Vertical nametable mirroring.
    pub fn vertical_mirroring(&self) -> bool {
        self.flags6 & 0x01 != 0
    }

    /// Battery-backed PRG-RAM.
    pub fn has_battery(&self) -> bool {
        self.flags6 & 0x02 != 0
    }

    /// 512-byte trainer before PRG data.
    pub fn has_trainer(&self) -> bool {
        self.flags6 & 0x04 != 0
    }

    /// NES 2.0 format marker.
    pub fn is_nes2(&self) -> bool {
        self.flags7 & 0x0C == 0x08
    }

    /// PRG-ROM size in bytes.
    pub fn prg_rom_size(&self) -> usize {
        self.prg_banks as usize * 16 * 1024
    }

    /// CHR-ROM size in bytes.
    pub fn chr_rom_size(&self) -> usize {
        self.chr_banks as usize * 8 * 1024
    }
}

/// Whether a ROM image uses an expansion-audio mapper; false when the header
/// does not parse.
pub fn rom_has_expansion_audio(rom: &[u8]) -> bool {
    InesHeader::parse(rom).is_ok_and(|h| h.has_expansion_audio())
}
