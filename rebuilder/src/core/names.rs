//! Process image-name matching shared by both kill backends.

/// Host process image names targeted by kill and detection.
pub const DEFAULT_HOST_PROCESS_NAMES: &[&str] = &[
    "UnrealEditor.exe",
    "UE5Editor.exe",
    "UE4Editor.exe",
    "CrashReportClientEditor.exe",
];

/// Strip a trailing `.exe` (any case).
pub fn image_stem(name: &str) -> &str {
    let len = name.len();
    if len > 4 && name.is_char_boundary(len - 4) && name[len - 4..].eq_ignore_ascii_case(".exe") {
        &name[..len - 4]
    } else {
        name
    }
}

/// Linux keeps at most this many bytes of a process name in `comm`.
pub const COMM_MAX_BYTES: usize = 15;

/// `name` cut to what Linux reports as `comm`, never splitting a character.
pub fn comm_name(name: &str) -> &str {
    if name.len() <= COMM_MAX_BYTES {
        return name;
    }
    let mut end = COMM_MAX_BYTES;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Case-insensitive match that ignores the `.exe` suffix on either side.
///
/// Linux truncates `comm` to 15 bytes, so a 15-byte actual name also matches
/// a longer wanted name sharing the same prefix.
pub fn matches_process_name(actual: &str, wanted: &str) -> bool {
    let actual = image_stem(actual.trim());
    let wanted = image_stem(wanted.trim());
    if actual.is_empty() || wanted.is_empty() {
        return false;
    }
    if actual.eq_ignore_ascii_case(wanted) {
        return true;
    }
    actual.len() == COMM_MAX_BYTES
        && wanted.len() > COMM_MAX_BYTES
        && comm_name(wanted).eq_ignore_ascii_case(actual)
}

pub fn matches_any(actual: &str, wanted: &[String]) -> bool {
    wanted.iter().any(|w| matches_process_name(actual, w))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exe_suffix_is_optional_on_both_sides() {
        assert!(matches_process_name("UnrealEditor", "UnrealEditor.exe"));
        assert!(matches_process_name("unrealeditor.EXE", "UnrealEditor"));
        assert!(!matches_process_name("UnrealEditorServices", "UnrealEditor.exe"));
    }

    #[test]
    fn truncated_linux_comm_matches_long_names() {
        assert!(matches_process_name(
            "CrashReportClie",
            "CrashReportClientEditor.exe"
        ));
        assert!(!matches_process_name("CrashReport", "CrashReportClientEditor.exe"));
    }

    #[test]
    fn comm_name_cuts_at_fifteen_bytes() {
        assert_eq!(comm_name("CrashReportClientEditor"), "CrashReportClie");
        assert_eq!(comm_name("UnrealEditor"), "UnrealEditor");
        // 14 ASCII bytes then a two-byte character straddling the limit.
        assert_eq!(comm_name("UnrealEditorXXé"), "UnrealEditorXX");
    }

    #[test]
    fn empty_names_never_match() {
        assert!(!matches_process_name("", "UnrealEditor.exe"));
        assert!(!matches_process_name("  ", "UnrealEditor"));
        assert_eq!(image_stem(".exe"), ".exe");
    }
}
