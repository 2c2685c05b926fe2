/// Tools that run even while the automation permission is off.
pub const NO_PRIVILEGE_TOOLS: &[&str] = &[
    "get_status",
    "list_tabs",
    "get_console_logs",
    "get_network_log",
    "get_animations",
    "get_dom_mutations",
    "get_extension_errors",
];

/// Management and meta tools that never act on a tab.
pub const NO_TARGET_TOOLS: &[&str] = &[
    "get_status",
    "list_tabs",
    "capture_extension_errors",
    "get_extension_errors",
    "clear_extension_errors",
    "snapshot_extension_state",
    "diff_extension_state",
];

#[must_use]
pub fn requires_privilege(tool: &str) -> bool {
    !NO_PRIVILEGE_TOOLS.contains(&tool)
}

#[must_use]
pub fn requires_target(tool: &str) -> bool {
    !NO_TARGET_TOOLS.contains(&tool)
}
