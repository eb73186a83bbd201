//! CIP vendor id lookup.

/// Well-known ODVA vendor ids seen on plant networks.
const VENDORS: &[(u16, &str)] = &[
    (1, "Rockwell Automation/Allen-Bradley"),
    (26, "Festo"),
    (40, "WAGO"),
    (47, "Omron"),
    (48, "Turck"),
    (90, "HMS Industrial Networks"),
    (108, "Beckhoff Automation"),
    (283, "Hilscher"),
    (808, "SICK"),
];

/// Returns the vendor name for `id`, or `Unknown (0xNNNN)`.
pub fn vendor_name(id: u16) -> String {
    VENDORS
        .binary_search_by_key(&id, |&(vendor, _)| vendor)
        .map(|index| VENDORS[index].1.to_string())
        .unwrap_or_else(|_| format!("Unknown (0x{:04X})", id))
}
