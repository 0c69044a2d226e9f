//! Path-hash index with a separate directory index.
//!
//! The primary index holds the mount point, index locations and a blob of
//! bit-packed entries. The directory index maps each directory to its files,
//! each file carrying an offset into the blob. Negative offsets select a
//! full inline record stored after the blob; `i32::MIN` marks an empty slot.

use ferropak_common::{ByteArchive, Game, ShaHash};
use tracing::{debug, warn};

use super::{reconstruct_path, validate_mount_point, IndexContext, ParsedIndex};
use crate::entry::PakEntry;
use crate::{Error, Result};

/// Directory-index offset marking a file slot without an entry.
const SKIPPED_SLOT: i32 = i32::MIN;

/// Location of the directory index inside the container.
struct DirectoryIndexLocation {
    offset: i64,
    size: i64,
    hash: ShaHash,
}

pub(super) fn parse(ctx: &IndexContext<'_>, mut index: ByteArchive) -> Result<ParsedIndex> {
    let game = index.versions().game;

    let (raw_mount_point, file_count) = if game.has_leading_index_header() {
        let _path_hash_seed = index.read_u64()?;
        let file_count = index.read_i32()?;
        (index.read_fstring()?, file_count)
    } else {
        let raw_mount_point = index.read_fstring()?;
        let file_count = index.read_i32()?;
        let _path_hash_seed = index.read_u64()?;
        (raw_mount_point, file_count)
    };

    if file_count < 0 {
        return Err(Error::corrupt_index(
            ctx.name(),
            format!("negative file count {file_count}"),
        ));
    }
    let mount_point = validate_mount_point(ctx.name(), &raw_mount_point);

    if !index.read_bool()? {
        return Err(Error::corrupt_index(ctx.name(), "no path hash index"));
    }
    // path hash index offset, size and hash
    index.advance(8 + 8 + ShaHash::SIZE);
    if game == Game::Rennsport {
        index.advance(16);
    }

    if !index.read_bool()? {
        return Err(Error::corrupt_index(ctx.name(), "no directory index"));
    }
    let directory = DirectoryIndexLocation {
        offset: index.read_i64()?,
        size: index.read_i64()?,
        hash: ShaHash::read(&mut index)?,
    };
    match game {
        Game::Rennsport => index.advance(20),
        // duplicated directory index record
        Game::TheDivisionResurgence => index.advance(40),
        _ => {}
    }

    let blob_size = if game == Game::Rennsport {
        index.remaining().saturating_sub(4)
    } else {
        let size = index.read_i32()?;
        usize::try_from(size).map_err(|_| {
            Error::corrupt_index(ctx.name(), format!("negative encoded entry size {size}"))
        })?
    };
    let blob = index.read_vec(blob_size)?;

    let trailing_count = index.read_i32()?;
    if trailing_count < 0 {
        return Err(Error::corrupt_index(
            ctx.name(),
            format!("corrupt pak primary index detected (trailing count {trailing_count})"),
        ));
    }
    let mut non_encoded = Vec::new();
    for _ in 0..trailing_count {
        non_encoded.push(PakEntry::read_inline(&mut index, ctx.footer)?);
    }

    let mut encoded = index.derive(format!("{} - Encoded entries", ctx.name()), blob);
    let mut dir_index = ctx.read_region(
        "Directory index",
        directory.offset,
        directory.size,
        Some(&directory.hash),
    )?;

    let mut parsed = ParsedIndex {
        mount_point,
        ..ParsedIndex::default()
    };
    parsed.entries.reserve(file_count as usize);

    let dir_count = dir_index.read_count()?;
    for _ in 0..dir_count {
        let dir_name = dir_index.read_fstring()?;
        let files = dir_index.read_count()?;
        for _ in 0..files {
            let file_name = dir_index.read_fstring()?;
            let offset = dir_index.read_i32()?;
            if offset == SKIPPED_SLOT {
                continue;
            }

            let mut entry = if offset >= 0 {
                encoded.seek(offset as u64);
                PakEntry::decode_encoded(&mut encoded, ctx.footer)?
            } else {
                let slot = (-(i64::from(offset)) - 1) as usize;
                non_encoded.get(slot).cloned().ok_or_else(|| {
                    Error::corrupt_index(
                        ctx.name(),
                        format!("non-encoded entry {slot} out of range ({})", non_encoded.len()),
                    )
                })?
            };
            entry.path = reconstruct_path(&parsed.mount_point, &dir_name, &file_name);
            parsed.push(entry);
        }
    }

    if parsed.entries.len() != file_count as usize {
        warn!(
            "{}: primary index lists {} files, directory index yields {}",
            ctx.name(),
            file_count,
            parsed.entries.len()
        );
    }
    debug!("{}: {} directories in directory index", ctx.name(), dir_count);

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{footer, ContainerImage, UpdatedIndexBuilder};
    use super::*;
    use crate::crypto::AesKey;
    use crate::footer::PakVersion;
    use ferropak_common::{ArchiveVersions, Game};

    fn mount(image: ContainerImage, builder: &UpdatedIndexBuilder, key: Option<&AesKey>) -> Result<ParsedIndex> {
        let f = footer(PakVersion::FNV64_BUG_FIX);
        let (ar, f) = builder.build(image, f, key);
        let ctx = IndexContext { archive: &ar, footer: &f, key };
        super::super::parse(&ctx)
    }

    fn sample() -> UpdatedIndexBuilder {
        let mut b = UpdatedIndexBuilder::new("../../../Game/", ArchiveVersions::default());
        b.file("/", "Root.uasset", 0x100, 10);
        b.file("/Maps/", "Level.umap", 0x200, 20);
        b.skipped("/Maps/", "Hole.umap");
        b
    }

    #[test]
    fn test_parse_updated_index() {
        let parsed = mount(ContainerImage::new(), &sample(), None).unwrap();

        assert_eq!(parsed.mount_point, "Game/");
        let paths: Vec<_> = parsed.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["Game/Root.uasset", "Game/Maps/Level.umap"]);
        assert_eq!(parsed.entries[1].offset, 0x200);
        assert_eq!(parsed.entries[1].uncompressed_size, 20);
    }

    #[test]
    fn test_parse_encrypted_updated_index() {
        let key: AesKey = "11".repeat(32).parse().unwrap();
        let parsed = mount(ContainerImage::new(), &sample(), Some(&key)).unwrap();
        assert_eq!(parsed.entries.len(), 2);
    }

    #[test]
    fn test_missing_path_hash_index_is_corrupt() {
        let mut b = sample();
        b.has_path_hash_index = false;
        assert!(matches!(
            mount(ContainerImage::new(), &b, None),
            Err(Error::CorruptIndex { .. })
        ));
    }

    #[test]
    fn test_negative_trailing_count_is_corrupt() {
        let mut b = sample();
        b.trailing_count = -1;
        assert!(matches!(
            mount(ContainerImage::new(), &b, None),
            Err(Error::CorruptIndex { .. })
        ));
    }

    #[test]
    fn test_leading_header_layout() {
        let mut b = UpdatedIndexBuilder::new("../../../Game/", ArchiveVersions::new(Game::DreamStar));
        b.file("/", "A.uasset", 0x10, 1);
        let parsed = mount(ContainerImage::new(), &b, None).unwrap();
        assert_eq!(parsed.entries[0].path, "Game/A.uasset");
    }
}
