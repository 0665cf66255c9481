//! Entry name resolution.
//!
//! A PKG entry gets its output name either from a fixed type→name mapping
//! (metadata files plus several numbered ranges) or, for file entries the
//! mapping does not cover, from the next unused string of the name table.

use crate::util::memchr_null;

use super::structs::PkgEntry;

/// Fixed metadata names by entry type.
const STATIC_NAMES: &[(u32, &str)] = &[
    (0x0400, "license.dat"),
    (0x0401, "license.info"),
    (0x0402, "nptitle.dat"),
    (0x0403, "npbind.dat"),
    (0x0404, "selfinfo.dat"),
    (0x0406, "imageinfo.dat"),
    (0x0407, "target-deltainfo.dat"),
    (0x0408, "origin-deltainfo.dat"),
    (0x0409, "psreserved.dat"),
    (0x1000, "param.sfo"),
    (0x1001, "playgo-chunk.dat"),
    (0x1002, "playgo-chunk.sha"),
    (0x1003, "playgo-manifest.xml"),
    (0x1004, "pronunciation.xml"),
    (0x1005, "pronunciation.sig"),
    (0x1006, "pic1.png"),
    (0x1007, "pubtoolinfo.dat"),
    (0x1008, "app/playgo-chunk.dat"),
    (0x1009, "app/playgo-chunk.sha"),
    (0x100A, "app/playgo-manifest.xml"),
    (0x100B, "shareparam.json"),
    (0x100C, "shareoverlayimage.png"),
    (0x100D, "save_data.png"),
    (0x100E, "shareprivacyguardimage.png"),
    (0x1200, "icon0.png"),
    (0x1220, "pic0.png"),
    (0x1240, "snd0.at9"),
    (0x1260, "changeinfo/changeinfo.xml"),
    (0x1280, "icon0.dds"),
    (0x12A0, "pic0.dds"),
    (0x12C0, "pic1.dds"),
];

/// Resolves the fixed output name for an entry type.
///
/// Returns `None` for types without a fixed name; file entries of such types
/// take their name from the name table instead.
pub fn type_to_name(entry_type: u32) -> Option<String> {
    let t = entry_type;
    match t {
        0x1201..=0x121F => Some(format!("icon0_{:02}.png", t - 0x1201)),
        0x1241..=0x125F => Some(format!("pic1_{:02}.png", t - 0x1241)),
        0x1261..=0x127F => Some(format!("changeinfo/changeinfo_{:02}.xml", t - 0x1261)),
        0x1281..=0x129F => Some(format!("icon0_{:02}.dds", t - 0x1281)),
        0x12C1..=0x12DF => Some(format!("pic1_{:02}.dds", t - 0x12C1)),
        0x1400..=0x1463 => Some(format!("trophy/trophy{:02}.trp", t - 0x1400)),
        0x1600..=0x1609 => Some(format!("keymap_rp/{:03}.png", t - 0x1600)),
        0x1610..=0x17F9 => Some(format!(
            "keymap_rp/{:02}/{:03}.png",
            (t - 0x1610) / 0x10,
            (t - 0x1610) % 0x10
        )),
        _ => STATIC_NAMES
            .iter()
            .find(|(ty, _)| *ty == t)
            .map(|(_, name)| (*name).to_string()),
    }
}

// =============================================================================
// Name Table
// =============================================================================

/// Ordered list of names collected from every name-table entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameTable {
    names: Vec<String>,
}

impl NameTable {
    /// Creates an empty name table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the names stored in one name-table entry.
    ///
    /// The entry data starts with a single marker byte, followed by
    /// NUL-terminated strings; decoding stops at the first empty string or
    /// at the end of `data`.
    pub fn extend_from_entry(&mut self, data: &[u8]) {
        let mut rest = data.get(1..).unwrap_or_default();

        while !rest.is_empty() {
            let len = memchr_null(rest);
            if len == 0 {
                break;
            }
            self.names
                .push(String::from_utf8_lossy(&rest[..len]).into_owned());
            rest = rest.get(len + 1..).unwrap_or_default();
        }
    }

    /// Returns the number of names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if the table holds no names.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterates the names in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Where a resolved name came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameSource {
    /// Fixed type→name mapping
    Static,
    /// Name table, with the index of the consumed string
    NameTable(usize),
}

/// Outcome of name resolution for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The entry is written to `sce_sys/<name>`.
    Named { name: String, source: NameSource },
    /// A file entry that found no fixed name and no remaining name-table string.
    Unnamed,
    /// Not a file entry and no fixed name (signatures, digests, tables).
    Skipped,
}

impl Resolution {
    /// Returns the resolved name, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Resolution::Named { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Resolves output names for all entries in table order.
///
/// Fixed names win. A file entry without a fixed name takes the next
/// unconsumed string from `names`, so the i-th such entry always receives the
/// i-th string. Running out of strings yields [`Resolution::Unnamed`].
pub fn resolve_names(entries: &[PkgEntry], names: &NameTable) -> Vec<Resolution> {
    let mut cursor = names.iter().enumerate();

    entries
        .iter()
        .map(|entry| {
            if let Some(name) = type_to_name(entry.entry_type) {
                return Resolution::Named {
                    name,
                    source: NameSource::Static,
                };
            }
            if !entry.is_file() {
                return Resolution::Skipped;
            }
            match cursor.next() {
                Some((index, name)) => Resolution::Named {
                    name: name.to_string(),
                    source: NameSource::NameTable(index),
                },
                None => Resolution::Unnamed,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::structs::EntryFlags;

    fn entry(index: usize, entry_type: u32) -> PkgEntry {
        PkgEntry {
            index,
            entry_type,
            offset: 0,
            size: 0,
            flags: EntryFlags::empty(),
        }
    }

    #[test]
    fn test_static_names() {
        let cases: &[(u32, Option<&str>)] = &[
            (0x0400, Some("license.dat")),
            (0x0405, None),
            (0x0409, Some("psreserved.dat")),
            (0x1000, Some("param.sfo")),
            (0x100A, Some("app/playgo-manifest.xml")),
            (0x100E, Some("shareprivacyguardimage.png")),
            (0x100F, None),
            (0x1200, Some("icon0.png")),
            (0x1220, Some("pic0.png")),
            (0x1240, Some("snd0.at9")),
            (0x1260, Some("changeinfo/changeinfo.xml")),
            (0x1280, Some("icon0.dds")),
            (0x12A0, Some("pic0.dds")),
            (0x12C0, Some("pic1.dds")),
            (0x0200, None),
            (0x0001, None),
        ];
        for (ty, expected) in cases {
            assert_eq!(type_to_name(*ty).as_deref(), *expected, "type {ty:#06x}");
        }
    }

    #[test]
    fn test_range_boundaries() {
        let cases: &[(u32, Option<&str>)] = &[
            (0x1201, Some("icon0_00.png")),
            (0x121F, Some("icon0_30.png")),
            (0x1221, None),
            (0x1241, Some("pic1_00.png")),
            (0x125F, Some("pic1_30.png")),
            (0x1261, Some("changeinfo/changeinfo_00.xml")),
            (0x127F, Some("changeinfo/changeinfo_30.xml")),
            (0x1281, Some("icon0_00.dds")),
            (0x129F, Some("icon0_30.dds")),
            (0x12A1, None),
            (0x12C1, Some("pic1_00.dds")),
            (0x12DF, Some("pic1_30.dds")),
            (0x12E0, None),
            (0x13FF, None),
            (0x1400, Some("trophy/trophy00.trp")),
            (0x1463, Some("trophy/trophy99.trp")),
            (0x1464, None),
            (0x15FF, None),
            (0x1600, Some("keymap_rp/000.png")),
            (0x1609, Some("keymap_rp/009.png")),
            (0x160A, None),
            (0x160F, None),
            (0x1610, Some("keymap_rp/00/000.png")),
            (0x161F, Some("keymap_rp/00/015.png")),
            (0x1620, Some("keymap_rp/01/000.png")),
            (0x17F9, Some("keymap_rp/30/009.png")),
            (0x17FA, None),
        ];
        for (ty, expected) in cases {
            assert_eq!(type_to_name(*ty).as_deref(), *expected, "type {ty:#06x}");
        }
    }

    #[test]
    fn test_name_table_parsing() {
        let mut table = NameTable::new();
        table.extend_from_entry(b"\0a.bin\0dir/b.bin\0\0c.bin\0");
        assert_eq!(table.iter().collect::<Vec<_>>(), vec!["a.bin", "dir/b.bin"]);

        // Unterminated trailing string is still taken
        table.extend_from_entry(b"\0tail");
        assert_eq!(table.len(), 3);
        assert_eq!(table.iter().last(), Some("tail"));

        let mut empty = NameTable::new();
        empty.extend_from_entry(b"");
        empty.extend_from_entry(b"\0\0");
        assert!(empty.is_empty());
    }

    #[test]
    fn test_resolution_is_sequential() {
        let mut table = NameTable::new();
        table.extend_from_entry(b"\0first.bin\0second.bin\0");

        let entries = vec![
            entry(0, 0x0200),
            entry(1, 0x1000),
            entry(2, 0x1234),
            entry(3, 0x0001),
            entry(4, 0x1300),
            entry(5, 0x1301),
        ];
        let resolved = resolve_names(&entries, &table);

        assert_eq!(resolved[0], Resolution::Skipped);
        assert_eq!(resolved[1].name(), Some("param.sfo"));
        assert_eq!(
            resolved[2],
            Resolution::Named {
                name: "first.bin".into(),
                source: NameSource::NameTable(0)
            }
        );
        assert_eq!(resolved[3], Resolution::Skipped);
        assert_eq!(
            resolved[4],
            Resolution::Named {
                name: "second.bin".into(),
                source: NameSource::NameTable(1)
            }
        );
        assert_eq!(resolved[5], Resolution::Unnamed);

        // Deterministic across runs
        assert_eq!(resolve_names(&entries, &table), resolved);
    }
}
