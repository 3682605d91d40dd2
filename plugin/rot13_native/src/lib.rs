// Example native-interface plugin: ROT13 over ASCII text.
//
// Exports the three C symbols the host resolves by name:
//   transmute_plugin_info        -> static info record, never freed
//   transmute_plugin_execute     -> heap result, freed by the call below
//   transmute_plugin_free_result
//
// The option callbacks in the request are only valid during execute and are
// not retained.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::PathBuf;

const API_VERSION: c_int = 1;

const STATUS_SUCCESS: c_int = 0;
const STATUS_ERROR: c_int = 1;
const STATUS_SKIPPED: c_int = 2;

#[repr(C)]
pub struct PluginInfo {
    pub name: *const c_char,
    pub group: *const c_char,
    pub etl: c_int,
    pub version: *const c_char,
    pub description: *const c_char,
    pub targets: *const *const c_char,
    pub input_formats: *const *const c_char,
    pub api_version: c_int,
}

type OptionGetter = unsafe extern "C" fn(key: *const c_char, ctx: *mut c_void) -> *const c_char;

#[repr(C)]
pub struct Request {
    pub etl: c_int,
    pub source: *const c_char,
    pub target: *const c_char,
    pub output: *const c_char,
    pub force: c_int,
    pub dry_run: c_int,
    pub get_core_option: Option<OptionGetter>,
    pub get_plugin_option: Option<OptionGetter>,
    pub options_ctx: *mut c_void,
}

#[repr(C)]
pub struct PluginResult {
    pub status: c_int,
    pub output: *mut c_char,
    pub output_size: usize,
    pub error: *mut c_char,
    pub extra_json: *mut c_char,
}

static NAME: &[u8] = b"rot13-native\0";
static GROUP: &[u8] = b"examples\0";
static VERSION: &[u8] = b"0.1.0\0";
static DESCRIPTION: &[u8] = b"ROT13 text transform (example native plugin)\0";
static TARGET_ROT13: &[u8] = b"rot13\0";
static FORMAT_TXT: &[u8] = b"txt\0";
static FORMAT_MD: &[u8] = b"md\0";

// Raw pointers into 'static data; read-only for the process lifetime.
#[repr(transparent)]
struct SyncArray<const N: usize>([*const c_char; N]);
// SAFETY: the pointers target immutable 'static byte strings.
unsafe impl<const N: usize> Sync for SyncArray<N> {}

static TARGETS: SyncArray<2> =
    SyncArray([TARGET_ROT13.as_ptr() as *const c_char, std::ptr::null()]);
static INPUT_FORMATS: SyncArray<3> = SyncArray([
    FORMAT_TXT.as_ptr() as *const c_char,
    FORMAT_MD.as_ptr() as *const c_char,
    std::ptr::null(),
]);

static INFO: PluginInfo = PluginInfo {
    name: NAME.as_ptr() as *const c_char,
    group: GROUP.as_ptr() as *const c_char,
    etl: 0,
    version: VERSION.as_ptr() as *const c_char,
    description: DESCRIPTION.as_ptr() as *const c_char,
    targets: &TARGETS.0 as *const [*const c_char; 2] as *const *const c_char,
    input_formats: &INPUT_FORMATS.0 as *const [*const c_char; 3] as *const *const c_char,
    api_version: API_VERSION,
};

// SAFETY: the info record only holds pointers to 'static NUL-terminated
// byte strings and arrays; it is read-only for the whole process lifetime.
unsafe impl Sync for PluginInfo {}

#[no_mangle]
pub extern "C" fn transmute_plugin_info() -> *const PluginInfo {
    &INFO
}

fn rot13(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'a'..='z' => (((c as u8 - b'a' + 13) % 26) + b'a') as char,
            'A'..='Z' => (((c as u8 - b'A' + 13) % 26) + b'A') as char,
            other => other,
        })
        .collect()
}

fn into_raw(s: String) -> *mut c_char {
    CString::new(s).map(CString::into_raw).unwrap_or(std::ptr::null_mut())
}

fn boxed_result(status: c_int, output: Option<(String, usize)>, error: Option<String>) -> *mut PluginResult {
    let (output_ptr, output_size) = match output {
        Some((path, size)) => (into_raw(path), size),
        None => (std::ptr::null_mut(), 0),
    };
    Box::into_raw(Box::new(PluginResult {
        status,
        output: output_ptr,
        output_size,
        error: error.map(into_raw).unwrap_or(std::ptr::null_mut()),
        extra_json: std::ptr::null_mut(),
    }))
}

/// # Safety
/// `request` must point to a valid `Request` whose string fields are
/// NUL-terminated and live for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn transmute_plugin_execute(request: *const Request) -> *mut PluginResult {
    if request.is_null() {
        return boxed_result(STATUS_ERROR, None, Some("null request".to_string()));
    }
    let request = &*request;

    if request.source.is_null() {
        return boxed_result(STATUS_ERROR, None, Some("null source".to_string()));
    }
    let source = PathBuf::from(CStr::from_ptr(request.source).to_string_lossy().into_owned());

    let output = if request.output.is_null() {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        PathBuf::from(format!("{}.rot13.txt", stem))
    } else {
        PathBuf::from(CStr::from_ptr(request.output).to_string_lossy().into_owned())
    };

    if output.exists() && request.force == 0 {
        return boxed_result(
            STATUS_SKIPPED,
            Some((output.display().to_string(), 0)),
            None,
        );
    }

    if request.dry_run != 0 {
        return boxed_result(STATUS_SUCCESS, Some((output.display().to_string(), 0)), None);
    }

    let content = match std::fs::read_to_string(&source) {
        Ok(content) => content,
        Err(e) => {
            return boxed_result(
                STATUS_ERROR,
                None,
                Some(format!("cannot read {}: {}", source.display(), e)),
            );
        }
    };

    let rotated = rot13(&content);
    if let Err(e) = std::fs::write(&output, &rotated) {
        return boxed_result(
            STATUS_ERROR,
            None,
            Some(format!("cannot write {}: {}", output.display(), e)),
        );
    }

    boxed_result(
        STATUS_SUCCESS,
        Some((output.display().to_string(), rotated.len())),
        None,
    )
}

/// # Safety
/// `result` must be a pointer previously returned by
/// `transmute_plugin_execute`, passed at most once.
#[no_mangle]
pub unsafe extern "C" fn transmute_plugin_free_result(result: *mut PluginResult) {
    if result.is_null() {
        return;
    }
    let result = Box::from_raw(result);
    if !result.output.is_null() {
        drop(CString::from_raw(result.output));
    }
    if !result.error.is_null() {
        drop(CString::from_raw(result.error));
    }
    if !result.extra_json.is_null() {
        drop(CString::from_raw(result.extra_json));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rot13_round_trips() {
        assert_eq!(rot13("Hello, World!"), "Uryyb, Jbeyq!");
        assert_eq!(rot13(&rot13("Hello")), "Hello");
    }
}
