//! Minimal MBR handling for staging: wrapping a bare filesystem image in a
//! single-partition table, and extracting the first partition back out.

use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::debug;
use unikit_core::{Result, UnikitError};

pub const SECTOR_SIZE: u64 = 512;
/// 1 MiB alignment, as modern partitioning tools use.
pub const FIRST_PARTITION_LBA: u32 = 2048;
pub const LINUX_PARTITION_TYPE: u8 = 0x83;

const PARTITION_TABLE_OFFSET: usize = 446;
const PARTITION_ENTRY_SIZE: usize = 16;
const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
const STATUS_BOOTABLE: u8 = 0x80;
const STATUS_INACTIVE: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbrPartition {
    pub bootable: bool,
    pub partition_type: u8,
    pub start_lba: u32,
    pub sector_count: u32,
}

impl MbrPartition {
    pub fn byte_offset(&self) -> u64 {
        u64::from(self.start_lba) * SECTOR_SIZE
    }

    pub fn byte_len(&self) -> u64 {
        u64::from(self.sector_count) * SECTOR_SIZE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mbr {
    pub partitions: Vec<MbrPartition>,
}

impl Mbr {
    /// Parses a boot sector. Returns `None` unless the sector carries the boot
    /// signature, every status byte is valid and at least one entry is in use.
    pub fn parse(sector: &[u8; SECTOR_SIZE as usize]) -> Option<Self> {
        if sector[510..512] != BOOT_SIGNATURE {
            return None;
        }

        let mut partitions = Vec::new();
        for index in 0..4 {
            let entry = &sector[PARTITION_TABLE_OFFSET + index * PARTITION_ENTRY_SIZE..]
                [..PARTITION_ENTRY_SIZE];
            let status = entry[0];
            if status != STATUS_BOOTABLE && status != STATUS_INACTIVE {
                return None;
            }

            let partition_type = entry[4];
            let start_lba = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]);
            let sector_count = u32::from_le_bytes([entry[12], entry[13], entry[14], entry[15]]);
            if partition_type == 0 || sector_count == 0 {
                continue;
            }
            if start_lba == 0 {
                return None;
            }

            partitions.push(MbrPartition {
                bootable: status == STATUS_BOOTABLE,
                partition_type,
                start_lba,
                sector_count,
            });
        }

        if partitions.is_empty() {
            None
        } else {
            Some(Self { partitions })
        }
    }

    pub fn to_bytes(&self) -> [u8; SECTOR_SIZE as usize] {
        let mut sector = [0u8; SECTOR_SIZE as usize];
        for (index, partition) in self.partitions.iter().take(4).enumerate() {
            let entry = &mut sector[PARTITION_TABLE_OFFSET + index * PARTITION_ENTRY_SIZE..]
                [..PARTITION_ENTRY_SIZE];
            entry[0] = if partition.bootable {
                STATUS_BOOTABLE
            } else {
                STATUS_INACTIVE
            };
            // CHS fields are unused; mark them as "use LBA".
            entry[1..4].copy_from_slice(&[0xFE, 0xFF, 0xFF]);
            entry[4] = partition.partition_type;
            entry[5..8].copy_from_slice(&[0xFE, 0xFF, 0xFF]);
            entry[8..12].copy_from_slice(&partition.start_lba.to_le_bytes());
            entry[12..16].copy_from_slice(&partition.sector_count.to_le_bytes());
        }
        sector[510..512].copy_from_slice(&BOOT_SIGNATURE);
        sector
    }

    pub fn first(&self) -> Option<&MbrPartition> {
        self.partitions.first()
    }
}

/// Reads the partition table of a raw disk image, if it has one.
pub async fn read_mbr(path: &Path) -> Result<Option<Mbr>> {
    let mut file = File::open(path).await?;
    let len = file.metadata().await?.len();
    if len < SECTOR_SIZE {
        return Ok(None);
    }

    let mut sector = [0u8; SECTOR_SIZE as usize];
    file.read_exact(&mut sector).await?;
    Ok(Mbr::parse(&sector))
}

/// Writes `input` (a bare filesystem) into `output` behind a one-entry MBR.
pub async fn wrap_in_partition_table(input: &Path, output: &Path) -> Result<Mbr> {
    let mut source = File::open(input).await?;
    let len = source.metadata().await?.len();
    let sectors = len.div_ceil(SECTOR_SIZE);
    let sector_count = u32::try_from(sectors).map_err(|_| {
        UnikitError::InvalidInput(format!(
            "{} is too large for an MBR partition",
            input.display()
        ))
    })?;
    if sector_count == 0 {
        return Err(UnikitError::InvalidInput(format!(
            "{} is empty",
            input.display()
        )));
    }

    let mbr = Mbr {
        partitions: vec![MbrPartition {
            bootable: true,
            partition_type: LINUX_PARTITION_TYPE,
            start_lba: FIRST_PARTITION_LBA,
            sector_count,
        }],
    };

    let mut target = File::create(output).await?;
    target.write_all(&mbr.to_bytes()).await?;
    target
        .seek(SeekFrom::Start(u64::from(FIRST_PARTITION_LBA) * SECTOR_SIZE))
        .await?;
    let copied = tokio::io::copy(&mut source, &mut target).await?;
    // Pad the partition to a whole number of sectors.
    let padded_len = (u64::from(FIRST_PARTITION_LBA) + sectors) * SECTOR_SIZE;
    target.set_len(padded_len).await?;
    target.flush().await?;

    debug!(
        "Wrapped {} ({} bytes) into {} with partition at LBA {}",
        input.display(),
        copied,
        output.display(),
        FIRST_PARTITION_LBA
    );
    Ok(mbr)
}

/// Copies the first partition of `input` into `output` as a bare image.
pub async fn extract_first_partition(input: &Path, output: &Path) -> Result<MbrPartition> {
    let mbr = read_mbr(input).await?.ok_or_else(|| {
        UnikitError::InvalidInput(format!("{} has no partition table", input.display()))
    })?;
    let partition = *mbr.first().ok_or_else(|| {
        UnikitError::InvalidInput(format!("{} has no partitions", input.display()))
    })?;

    let mut source = File::open(input).await?;
    let len = source.metadata().await?.len();
    let end = partition.byte_offset() + partition.byte_len();
    if end > len {
        return Err(UnikitError::InvalidInput(format!(
            "partition in {} ends at byte {} but the image is only {} bytes",
            input.display(),
            end,
            len
        )));
    }

    source.seek(SeekFrom::Start(partition.byte_offset())).await?;
    let mut limited = source.take(partition.byte_len());
    let mut target = File::create(output).await?;
    tokio::io::copy(&mut limited, &mut target).await?;
    target.flush().await?;

    debug!(
        "Extracted partition at LBA {} ({} sectors) from {}",
        partition.start_lba,
        partition.sector_count,
        input.display()
    );
    Ok(partition)
}
