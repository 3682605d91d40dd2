//! file: core/src/native_loader.rs
//! description: native loader backend — dynamic library plus C ABI.
//!
//! The library is opened with OS-local symbols and must export three
//! functions by name: `transmute_plugin_info`, `transmute_plugin_execute`
//! and `transmute_plugin_free_result`. Options cross the boundary through
//! two callback pointers plus an opaque context whose lifetime is one
//! `execute` call; the plugin must not retain them past return. Results are
//! allocated by the plugin and handed back to its own free function once
//! the host has copied the fields out.
//!
//! Load failures (missing library, missing symbol, ABI mismatch) surface as
//! an error for the current request only; the next request retries the
//! load, so a plugin is never blacklisted.

use crate::error::PluginError;
use crate::manifest::PluginManifest;
use crate::plugin::Plugin;
use crate::types::{ConvertOutcome, ConvertRequest, EtlKind, PluginInfo, ResultStatus};
use async_trait::async_trait;
use libloading::Library;
use std::collections::BTreeMap;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Compile-time ABI version of this host. Plugins reporting a different
/// nonzero version are refused.
pub const HOST_ABI_VERSION: u32 = 1;

pub const INFO_SYMBOL: &[u8] = b"transmute_plugin_info\0";
pub const EXECUTE_SYMBOL: &[u8] = b"transmute_plugin_execute\0";
pub const FREE_RESULT_SYMBOL: &[u8] = b"transmute_plugin_free_result\0";

/// Option lookup callback handed to the plugin. Returns the value for the
/// key or null.
pub type RawOptionGetter =
    unsafe extern "C" fn(key: *const c_char, ctx: *mut c_void) -> *const c_char;

/// Static info record owned by the plugin; never freed by the host.
#[repr(C)]
pub struct RawPluginInfo {
    pub name: *const c_char,
    pub group: *const c_char,
    /// 0 = transform, 1 = extract, 2 = load.
    pub etl: c_int,
    pub version: *const c_char,
    pub description: *const c_char,
    /// NULL-terminated array.
    pub targets: *const *const c_char,
    /// NULL-terminated array; NULL or empty means accept all.
    pub input_formats: *const *const c_char,
    pub api_version: c_int,
}

#[repr(C)]
pub struct RawRequest {
    pub etl: c_int,
    pub source: *const c_char,
    pub target: *const c_char,
    /// May be null.
    pub output: *const c_char,
    pub force: c_int,
    pub dry_run: c_int,
    pub get_core_option: Option<RawOptionGetter>,
    pub get_plugin_option: Option<RawOptionGetter>,
    pub options_ctx: *mut c_void,
}

/// Heap record allocated by the plugin; the host copies the fields, then
/// calls the plugin's free function.
#[repr(C)]
pub struct RawResult {
    /// 0 = success, 1 = error, 2 = skipped.
    pub status: c_int,
    pub output: *mut c_char,
    pub output_size: usize,
    pub error: *mut c_char,
    pub extra_json: *mut c_char,
}

type InfoFn = unsafe extern "C" fn() -> *const RawPluginInfo;
type ExecuteFn = unsafe extern "C" fn(request: *const RawRequest) -> *mut RawResult;
type FreeResultFn = unsafe extern "C" fn(result: *mut RawResult);

/// Host-side option store the C callbacks read from. Valid only for the
/// duration of one execute call.
struct OptionContext {
    core: BTreeMap<CString, CString>,
    plugin: BTreeMap<CString, CString>,
}

impl OptionContext {
    fn build(request: &ConvertRequest) -> OptionContext {
        OptionContext {
            core: to_cstring_map(&request.core_options),
            plugin: to_cstring_map(&request.plugin_options),
        }
    }
}

fn to_cstring_map(map: &BTreeMap<String, String>) -> BTreeMap<CString, CString> {
    map.iter()
        .filter_map(|(k, v)| {
            let key = CString::new(k.as_str()).ok()?;
            let value = CString::new(v.as_str()).ok()?;
            Some((key, value))
        })
        .collect()
}

unsafe fn lookup(map: &BTreeMap<CString, CString>, key: *const c_char) -> *const c_char {
    if key.is_null() {
        return std::ptr::null();
    }
    let key = CStr::from_ptr(key);
    match map.iter().find(|(k, _)| k.as_c_str() == key) {
        Some((_, value)) => value.as_ptr(),
        None => std::ptr::null(),
    }
}

unsafe extern "C" fn get_core_option(key: *const c_char, ctx: *mut c_void) -> *const c_char {
    if ctx.is_null() {
        return std::ptr::null();
    }
    let context = &*(ctx as *const OptionContext);
    lookup(&context.core, key)
}

unsafe extern "C" fn get_plugin_option(key: *const c_char, ctx: *mut c_void) -> *const c_char {
    if ctx.is_null() {
        return std::ptr::null();
    }
    let context = &*(ctx as *const OptionContext);
    lookup(&context.plugin, key)
}

/// A successfully opened library with its resolved symbols.
struct LoadedLibrary {
    // Keeps the OS handle alive for as long as the function pointers are.
    _lib: Library,
    execute_fn: ExecuteFn,
    free_result_fn: FreeResultFn,
    info: PluginInfo,
}

pub struct NativePlugin {
    manifest: PluginManifest,
    loaded: Mutex<Option<Arc<LoadedLibrary>>>,
}

impl NativePlugin {
    pub fn new(manifest: PluginManifest) -> Self {
        NativePlugin { manifest, loaded: Mutex::new(None) }
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    fn library_path(&self) -> Result<PathBuf, PluginError> {
        let lib = PathBuf::from(&self.manifest.library);
        let base = if lib.is_absolute() { lib } else { self.manifest.plugin_dir.join(lib) };

        // Try the locator as written, with the platform suffix, and with
        // the Unix `lib` prefix, in that order.
        let mut candidates = vec![base.clone()];
        let mut with_ext = base.clone().into_os_string();
        with_ext.push(platform_library_extension());
        candidates.push(PathBuf::from(with_ext));
        if let Some(file_name) = base.file_name() {
            let mut prefixed = std::ffi::OsString::from("lib");
            prefixed.push(file_name);
            let mut prefixed = base.with_file_name(prefixed).into_os_string();
            prefixed.push(platform_library_extension());
            candidates.push(PathBuf::from(prefixed));
        }

        for candidate in candidates {
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(PluginError::LibraryOpen {
            path: base,
            reason: "library file does not exist".to_string(),
        })
    }

    /// Open the library and resolve the three required symbols, reusing a
    /// previously successful load. A failed load is not cached.
    fn load(&self) -> Result<Arc<LoadedLibrary>, PluginError> {
        let mut guard = self.loaded.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(loaded) = guard.as_ref() {
            return Ok(Arc::clone(loaded));
        }

        let path = self.library_path()?;
        // SAFETY: loading and symbol resolution follow the documented plugin
        // ABI; the library handle outlives every pointer resolved from it.
        let loaded = unsafe {
            let lib = Library::new(&path).map_err(|e| PluginError::LibraryOpen {
                path: path.clone(),
                reason: e.to_string(),
            })?;

            let info_fn = *lib
                .get::<InfoFn>(INFO_SYMBOL)
                .map_err(|_| missing_symbol(INFO_SYMBOL, &path))?;
            let execute_fn = *lib
                .get::<ExecuteFn>(EXECUTE_SYMBOL)
                .map_err(|_| missing_symbol(EXECUTE_SYMBOL, &path))?;
            let free_result_fn = *lib
                .get::<FreeResultFn>(FREE_RESULT_SYMBOL)
                .map_err(|_| missing_symbol(FREE_RESULT_SYMBOL, &path))?;

            let raw_info = info_fn();
            let info = self.merge_info(raw_info)?;

            LoadedLibrary { _lib: lib, execute_fn, free_result_fn, info }
        };

        let loaded = Arc::new(loaded);
        *guard = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Merge the library's self-reported info over the manifest projection
    /// and enforce the ABI version gate.
    unsafe fn merge_info(&self, raw: *const RawPluginInfo) -> Result<PluginInfo, PluginError> {
        let mut info = self.manifest.to_info();
        if raw.is_null() {
            return Ok(info);
        }
        let raw = &*raw;

        if raw.api_version != 0 && raw.api_version as u32 != HOST_ABI_VERSION {
            return Err(PluginError::AbiMismatch {
                found: raw.api_version as u32,
                expected: HOST_ABI_VERSION,
            });
        }

        if let Some(name) = copy_str(raw.name) {
            info.name = name;
        }
        if let Some(group) = copy_str(raw.group) {
            info.group = group;
        }
        if let Some(version) = copy_str(raw.version) {
            info.version = version;
        }
        if let Some(description) = copy_str(raw.description) {
            info.description = description;
        }
        info.etl = match raw.etl {
            1 => EtlKind::Extract,
            2 => EtlKind::Load,
            _ => EtlKind::Transform,
        };
        let targets = copy_str_array(raw.targets);
        if !targets.is_empty() {
            info.targets = targets;
        }
        let input_formats = copy_str_array(raw.input_formats);
        if !input_formats.is_empty() {
            info.input_formats = input_formats;
        }
        info.id = format!("{}.{}", info.group, info.etl);
        Ok(info)
    }
}

fn missing_symbol(symbol: &[u8], path: &std::path::Path) -> PluginError {
    PluginError::MissingSymbol {
        symbol: String::from_utf8_lossy(&symbol[..symbol.len() - 1]).into_owned(),
        path: path.to_path_buf(),
    }
}

unsafe fn copy_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let s = CStr::from_ptr(ptr).to_string_lossy().into_owned();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

unsafe fn copy_str_array(mut ptr: *const *const c_char) -> Vec<String> {
    let mut out = Vec::new();
    if ptr.is_null() {
        return out;
    }
    while !(*ptr).is_null() {
        if let Some(s) = copy_str(*ptr) {
            out.push(s);
        }
        ptr = ptr.add(1);
    }
    out
}

pub fn platform_library_extension() -> &'static str {
    if cfg!(target_os = "windows") {
        ".dll"
    } else if cfg!(target_os = "macos") {
        ".dylib"
    } else {
        ".so"
    }
}

#[async_trait]
impl Plugin for NativePlugin {
    fn info(&self) -> PluginInfo {
        // Prefer the library's own info when it has been loaded; fall back
        // to the manifest so resolution works before first execute.
        let guard = self.loaded.lock().unwrap_or_else(|p| p.into_inner());
        match guard.as_ref() {
            Some(loaded) => loaded.info.clone(),
            None => self.manifest.to_info(),
        }
    }

    async fn execute(&self, request: &ConvertRequest) -> Result<ConvertOutcome, PluginError> {
        let loaded = self.load()?;

        let source = CString::new(request.source.display().to_string())
            .map_err(|e| PluginError::Protocol(format!("source path: {}", e)))?;
        let target = CString::new(request.target.as_str())
            .map_err(|e| PluginError::Protocol(format!("target: {}", e)))?;
        let output = match &request.output {
            Some(path) => Some(
                CString::new(path.display().to_string())
                    .map_err(|e| PluginError::Protocol(format!("output path: {}", e)))?,
            ),
            None => None,
        };

        let mut options = OptionContext::build(request);

        let raw_request = RawRequest {
            etl: match request.etl {
                EtlKind::Transform => 0,
                EtlKind::Extract => 1,
                EtlKind::Load => 2,
            },
            source: source.as_ptr(),
            target: target.as_ptr(),
            output: output.as_ref().map_or(std::ptr::null(), |o| o.as_ptr()),
            force: request.force as c_int,
            dry_run: request.dry_run as c_int,
            get_core_option: Some(get_core_option),
            get_plugin_option: Some(get_plugin_option),
            options_ctx: &mut options as *mut OptionContext as *mut c_void,
        };

        // SAFETY: raw_request and the option context outlive the call; the
        // result pointer is either null or a plugin-allocated RawResult that
        // we copy out of and return through the plugin's free function.
        unsafe {
            let raw_result = (loaded.execute_fn)(&raw_request);
            if raw_result.is_null() {
                return Err(PluginError::Protocol("plugin returned null result".to_string()));
            }

            let status = match (*raw_result).status {
                0 => ResultStatus::Success,
                2 => ResultStatus::Skipped,
                _ => ResultStatus::Error,
            };
            let output = copy_str((*raw_result).output).map(PathBuf::from);
            let output_size = if (*raw_result).output_size > 0 {
                Some((*raw_result).output_size as u64)
            } else {
                None
            };
            let error = copy_str((*raw_result).error);
            let extra = copy_str((*raw_result).extra_json)
                .and_then(|s| serde_json::from_str(&s).ok());

            (loaded.free_result_fn)(raw_result);

            Ok(ConvertOutcome { status: Some(status), output, outputs: Vec::new(), output_size, error, extra })
        }
    }
}

/// Check whether a manifest describes a native plugin this loader can handle.
pub fn is_native_manifest(manifest: &PluginManifest) -> bool {
    manifest.interface == crate::manifest::InterfaceKind::Native
        && !manifest.library.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::InterfaceKind;
    use crate::types::DataKind;

    #[test]
    fn missing_library_is_an_open_error_per_request() {
        let manifest = PluginManifest {
            name: "native".to_string(),
            group: "native".to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            etl: EtlKind::Transform,
            targets: vec!["rot13".to_string()],
            input_formats: Vec::new(),
            interface: InterfaceKind::Native,
            executable: String::new(),
            library: "does_not_exist".to_string(),
            options: Vec::new(),
            dependencies: Vec::new(),
            input_types: vec![DataKind::Text],
            output_types: vec![DataKind::Text],
            manifest_path: PathBuf::new(),
            plugin_dir: PathBuf::from("/nonexistent"),
        };
        let plugin = NativePlugin::new(manifest);
        // info() still answers from the manifest
        assert_eq!(plugin.info().targets, vec!["rot13"]);
        let request = ConvertRequest::new(EtlKind::Transform, "a.txt", "rot13");
        let err = futures::executor::block_on(plugin.execute(&request)).unwrap_err();
        assert!(matches!(err, PluginError::LibraryOpen { .. }));
        // a second attempt fails the same way instead of being blacklisted
        let err = futures::executor::block_on(plugin.execute(&request)).unwrap_err();
        assert!(matches!(err, PluginError::LibraryOpen { .. }));
    }

    #[test]
    fn option_context_lookup_round_trips() {
        let mut request = ConvertRequest::new(EtlKind::Transform, "a.txt", "rot13");
        request.plugin_options.insert("shift".to_string(), "13".to_string());
        request.core_options.insert("force".to_string(), "true".to_string());
        let mut ctx = OptionContext::build(&request);
        let key = CString::new("shift").unwrap();
        unsafe {
            let ptr = get_plugin_option(
                key.as_ptr(),
                &mut ctx as *mut OptionContext as *mut c_void,
            );
            assert!(!ptr.is_null());
            assert_eq!(CStr::from_ptr(ptr).to_str().unwrap(), "13");

            let missing = CString::new("width").unwrap();
            let ptr = get_plugin_option(
                missing.as_ptr(),
                &mut ctx as *mut OptionContext as *mut c_void,
            );
            assert!(ptr.is_null());
        }
    }
}
