// SPDX-License-Identifier: GPL-3.0-only

//! Shared shader sources and GPU pipelines
//!
//! The filter kernels live in one WGSL library, one compute entry point per
//! filter. The workgroup size is not known until a device is open, so the
//! library is a template with `WORKGROUP_X`/`WORKGROUP_Y` placeholders that
//! [`filter_library_source`] fills in.

mod gpu_filter;
mod gpu_processor;

pub use gpu_filter::{WgpuBackend, WgpuPipeline};
pub use gpu_processor::{CachedDimensions, compute_dispatch_size, read_buffer_async};

/// Filter kernel library (WGSL template)
pub const FILTER_KERNELS: &str = include_str!("filters.wgsl");

/// Textured quad used by the display renderer (WGSL)
pub const DISPLAY_SHADER: &str = include_str!("display.wgsl");

/// Filter library with the workgroup size filled in
pub fn filter_library_source(workgroup_x: u32, workgroup_y: u32) -> String {
    FILTER_KERNELS
        .replace("WORKGROUP_X", &workgroup_x.to_string())
        .replace("WORKGROUP_Y", &workgroup_y.to_string())
}

/// Whether `source` declares a compute entry point called `name`
pub fn has_kernel(source: &str, name: &str) -> bool {
    let signature = format!("fn {}(", name);
    let mut previous = "";
    for line in source.lines().map(str::trim) {
        if line.starts_with(&signature) {
            return previous.starts_with("@compute");
        }
        if !line.is_empty() {
            previous = line;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FilterKind;

    #[test]
    fn test_every_filter_has_a_kernel() {
        for kind in FilterKind::ALL {
            if let Some(kernel) = kind.kernel_name() {
                assert!(has_kernel(FILTER_KERNELS, kernel), "missing {}", kernel);
            }
        }
    }

    #[test]
    fn test_helpers_are_not_kernels() {
        assert!(!has_kernel(FILTER_KERNELS, "in_bounds"));
        assert!(!has_kernel(FILTER_KERNELS, "store_pixel"));
        assert!(!has_kernel(FILTER_KERNELS, "blur"));
    }

    /// Parse and validate WGSL with naga
    fn validate_shader(name: &str, source: &str) {
        match naga::front::wgsl::parse_str(source) {
            Ok(module) => {
                let info = naga::valid::Validator::new(
                    naga::valid::ValidationFlags::all(),
                    naga::valid::Capabilities::all(),
                )
                .validate(&module);

                if let Err(e) = info {
                    panic!("Shader '{}' validation failed: {:?}", name, e);
                }
            }
            Err(e) => {
                panic!("Shader '{}' parse failed: {:?}", name, e);
            }
        }
    }

    #[test]
    fn test_filter_library_validates() {
        validate_shader("filters", &filter_library_source(16, 16));
    }

    #[test]
    fn test_display_shader_validates() {
        validate_shader("display", DISPLAY_SHADER);
    }

    #[test]
    fn test_workgroup_substitution() {
        let source = filter_library_source(32, 8);
        assert!(source.contains("@workgroup_size(32, 8, 1)"));
        assert!(!source.contains("WORKGROUP_X,"));
    }
}
