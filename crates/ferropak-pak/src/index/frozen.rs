//! Frozen index: a memory image of the engine's own pak index.
//!
//! Layout: mount point string, array of entry records, then a map of
//! directory name to a map of file name to entry index.

use ferropak_common::ByteArchive;

use super::{reconstruct_path, validate_mount_point, IndexContext, ParsedIndex};
use crate::entry::{PakEntry, FROZEN_ENTRY_SIZE};
use crate::frozen::{FrozenArchive, SET_SIZE, STRING_SIZE};
use crate::{Error, Result};

pub(super) fn parse(ctx: &IndexContext<'_>, index: ByteArchive) -> Result<ParsedIndex> {
    let mut fa = FrozenArchive::new(index);

    let raw_mount_point = fa.read_fstring()?;
    let mount_point = validate_mount_point(ctx.name(), &raw_mount_point);

    let entries = fa.read_array(FROZEN_ENTRY_SIZE, |fa| PakEntry::read_frozen(fa, ctx.footer))?;

    let directories = fa.read_map(
        STRING_SIZE,
        SET_SIZE,
        |fa| fa.read_fstring(),
        |fa| {
            fa.read_map(
                STRING_SIZE,
                4,
                |fa| fa.read_fstring(),
                |fa| Ok(fa.archive().read_i32()?),
            )
        },
    )?;

    let mut parsed = ParsedIndex {
        mount_point,
        ..ParsedIndex::default()
    };
    for (dir_name, files) in directories {
        for (file_name, entry_index) in files {
            let mut entry = usize::try_from(entry_index)
                .ok()
                .and_then(|i| entries.get(i))
                .cloned()
                .ok_or_else(|| {
                    Error::corrupt_index(
                        ctx.name(),
                        format!("entry index {entry_index} out of range ({})", entries.len()),
                    )
                })?;
            entry.path = reconstruct_path(&parsed.mount_point, &dir_name, &file_name);
            parsed.push(entry);
        }
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{archive_with_index, footer, frozen_index, FrozenFile};
    use super::*;
    use crate::compression::CompressionMethod;
    use crate::footer::PakVersion;

    #[test]
    fn test_parse_frozen_index() {
        let mut f = footer(PakVersion::FROZEN_INDEX);
        f.index_frozen = true;

        let image = frozen_index(
            "../../../Engine/",
            vec![
                FrozenFile::new("/", "Base.ini", 0x40, 12),
                FrozenFile::compressed("Shaders/", "Global.ush", 0x400, 4096, 1000),
                FrozenFile::deleted("Shaders/", "Old.ush"),
            ],
        );
        let (ar, f) = archive_with_index(f, image);
        let ctx = IndexContext { archive: &ar, footer: &f, key: None };
        let parsed = super::super::parse(&ctx).unwrap();

        assert_eq!(parsed.mount_point, "Engine/");
        let paths: Vec<_> = parsed.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["Engine/Base.ini", "Engine/Shaders/Global.ush"]);

        let shader = &parsed.entries[1];
        assert_eq!(shader.compression_method, CompressionMethod::Zlib);
        assert_eq!(shader.compression_blocks.len(), 1);
        assert_eq!(shader.compression_blocks[0].start, shader.data_offset());
        assert_eq!(shader.compression_blocks[0].size, 1000);
    }
}
