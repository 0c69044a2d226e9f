//! Flat index: mount point, entry count, then (path, inline record) pairs.

use ferropak_common::ByteArchive;

use super::{validate_mount_point, IndexContext, ParsedIndex};
use crate::entry::PakEntry;
use crate::{Error, Result};

pub(super) fn parse(ctx: &IndexContext<'_>, mut index: ByteArchive) -> Result<ParsedIndex> {
    let raw_mount_point = index.read_fstring()?;
    let mount_point = validate_mount_point(ctx.name(), &raw_mount_point);

    let count = index.read_i32()?;
    if count < 0 {
        return Err(Error::corrupt_index(
            ctx.name(),
            format!("negative file count {count}"),
        ));
    }

    let mut parsed = ParsedIndex {
        mount_point,
        ..ParsedIndex::default()
    };
    parsed.entries.reserve((count as usize).min(index.remaining() / 48));

    for _ in 0..count {
        let path = index.read_fstring()?;
        let mut entry = PakEntry::read_inline(&mut index, ctx.footer)?;
        entry.path = format!("{}{}", parsed.mount_point, path);
        parsed.push(entry);
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{archive_with_index, footer, LegacyIndexBuilder};
    use super::*;
    use crate::footer::PakVersion;

    #[test]
    fn test_parse_flat_index() {
        let f = footer(PakVersion::FNAME_BASED_COMPRESSION_METHOD);
        let mut builder = LegacyIndexBuilder::new("../../../Game/");
        builder.file("Maps/Level.umap", 0, 100);
        builder.file("Textures/T.uasset", 200, 50);
        builder.deleted("Old/Gone.uasset");
        let index = builder.finish(&f);
        let (ar, f) = archive_with_index(f, index);

        let ctx = IndexContext { archive: &ar, footer: &f, key: None };
        let parsed = super::super::parse(&ctx).unwrap();

        assert_eq!(parsed.mount_point, "Game/");
        let paths: Vec<_> = parsed.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["Game/Maps/Level.umap", "Game/Textures/T.uasset"]);
        assert_eq!(parsed.entries[1].offset, 200);
        assert_eq!(parsed.encrypted_count, 0);
    }

    #[test]
    fn test_negative_count_is_corrupt() {
        let f = footer(PakVersion::FNAME_BASED_COMPRESSION_METHOD);
        let mut data = Vec::new();
        data.extend_from_slice(&10i32.to_le_bytes());
        data.extend_from_slice(b"../../../\0");
        data.extend_from_slice(&(-1i32).to_le_bytes());
        let (ar, f) = archive_with_index(f, data);

        let ctx = IndexContext { archive: &ar, footer: &f, key: None };
        assert!(matches!(
            super::super::parse(&ctx),
            Err(Error::CorruptIndex { .. })
        ));
    }
}
