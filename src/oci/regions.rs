//! OCI regions and OCID helpers

/// Region key (as embedded in OCIDs) and region identifier
const REGIONS: &[(&str, &str)] = &[
    // North America
    ("phx", "us-phoenix-1"),
    ("iad", "us-ashburn-1"),
    ("sjc", "us-sanjose-1"),
    ("ord", "us-chicago-1"),
    ("yyz", "ca-toronto-1"),
    ("yul", "ca-montreal-1"),
    ("qro", "mx-queretaro-1"),
    ("mty", "mx-monterrey-1"),
    // Europe
    ("fra", "eu-frankfurt-1"),
    ("lhr", "uk-london-1"),
    ("cwl", "uk-cardiff-1"),
    ("ams", "eu-amsterdam-1"),
    ("zrh", "eu-zurich-1"),
    ("mad", "eu-madrid-1"),
    ("cdg", "eu-paris-1"),
    ("lin", "eu-milan-1"),
    ("arn", "eu-stockholm-1"),
    ("mrs", "eu-marseille-1"),
    // Asia Pacific
    ("nrt", "ap-tokyo-1"),
    ("kix", "ap-osaka-1"),
    ("icn", "ap-seoul-1"),
    ("yny", "ap-chuncheon-1"),
    ("bom", "ap-mumbai-1"),
    ("hyd", "ap-hyderabad-1"),
    ("syd", "ap-sydney-1"),
    ("mel", "ap-melbourne-1"),
    ("sin", "ap-singapore-1"),
    ("xsp", "ap-singapore-2"),
    // South America
    ("gru", "sa-saopaulo-1"),
    ("vcp", "sa-vinhedo-1"),
    ("scl", "sa-santiago-1"),
    ("bog", "sa-bogota-1"),
    ("vap", "sa-valparaiso-1"),
    // Middle East & Africa
    ("jed", "me-jeddah-1"),
    ("dxb", "me-dubai-1"),
    ("auh", "me-abudhabi-1"),
    ("mtz", "il-jerusalem-1"),
    ("jnb", "af-johannesburg-1"),
];

/// Resolve a region key (`phx`) or identifier (`us-phoenix-1`) to the identifier
pub fn region_name(key_or_name: &str) -> Option<String> {
    let lower = key_or_name.to_ascii_lowercase();
    REGIONS
        .iter()
        .find(|(key, name)| *key == lower || *name == lower)
        .map(|(_, name)| name.to_string())
        .or_else(|| {
            // Unknown but well-formed identifiers (newer regions) pass through
            let looks_like_region = lower.matches('-').count() >= 2
                && lower.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
            looks_like_region.then_some(lower)
        })
}

/// Check the general OCID shape: `ocid1.<type>.<realm>.[region].<unique>`
pub fn is_valid_ocid(ocid: &str) -> bool {
    let parts: Vec<&str> = ocid.split('.').collect();
    parts.len() >= 5
        && parts[0] == "ocid1"
        && !parts[1].is_empty()
        && !parts[2].is_empty()
        && parts
            .last()
            .map(|unique| !unique.is_empty())
            .unwrap_or(false)
        && ocid
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
}

/// Region embedded in an OCID. Global resources (tenancy, users,
/// compartments) leave the segment empty and yield `None`.
pub fn region_from_ocid(ocid: &str) -> Option<String> {
    if !is_valid_ocid(ocid) {
        return None;
    }
    let segment = ocid.split('.').nth(3)?;
    if segment.is_empty() {
        return None;
    }
    region_name(segment)
}
