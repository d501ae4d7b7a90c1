//! Pack format numbers and the game versions that read them.

const PACK_FORMAT_VERSIONS: &[(u32, &str)] = &[
    (1, "1.6.1 - 1.8.9"),
    (2, "1.9 - 1.10.2"),
    (3, "1.11 - 1.12.2"),
    (4, "1.13 - 1.14.4"),
    (5, "1.15 - 1.16.1"),
    (6, "1.16.2 - 1.16.5"),
    (7, "1.17 - 1.17.1"),
    (8, "1.18 - 1.18.2"),
    (9, "1.19 - 1.19.2"),
    (12, "1.19.3"),
    (13, "1.19.4"),
    (15, "1.20 - 1.20.1"),
    (18, "1.20.2"),
    (22, "1.20.3 - 1.20.4"),
    (32, "1.20.5 - 1.20.6"),
    (34, "1.21 - 1.21.1"),
];

pub const UNKNOWN_VERSION_RANGE: &str = "Unknown";

pub fn version_range_for_format(format: u32) -> &'static str {
    PACK_FORMAT_VERSIONS
        .iter()
        .find(|(known, _)| *known == format)
        .map(|(_, range)| *range)
        .unwrap_or(UNKNOWN_VERSION_RANGE)
}

pub fn known_formats() -> impl Iterator<Item = (u32, &'static str)> {
    PACK_FORMAT_VERSIONS.iter().copied()
}
