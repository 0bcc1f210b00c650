//! spvfront — SPIR-V front end.
//!
//! This crate translates a SPIR-V shader module into a structured SSA IR:
//! functions are trees of blocks, ifs and loops, values are SSA variables,
//! and memory is reached through deref chains or block index + byte offset
//! intrinsics.

pub mod ir;
pub mod parser;
mod translate;

// Re-export key types for convenience
pub use anyhow::{Context, Result};
pub use ir::{Shader, ShaderInfo, ShaderStage};

/// Optional features the consumer of the IR can handle.
///
/// Capabilities declared by a module but absent here produce a warning, not
/// an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub float64: bool,
    pub int64: bool,
    pub int64_atomics: bool,
    pub int16: bool,
    pub geometry: bool,
    pub geometry_streams: bool,
    pub tessellation: bool,
    pub image_ms_array: bool,
    pub storage_image_multisample: bool,
    pub image_read_without_format: bool,
    pub image_write_without_format: bool,
    pub multiview: bool,
    pub variable_pointers: bool,
    pub draw_parameters: bool,
}

impl Capabilities {
    /// Every optional capability enabled.
    pub fn all() -> Self {
        Self {
            float64: true,
            int64: true,
            int64_atomics: true,
            int16: true,
            geometry: true,
            geometry_streams: true,
            tessellation: true,
            image_ms_array: true,
            storage_image_multisample: true,
            image_read_without_format: true,
            image_write_without_format: true,
            multiview: true,
            variable_pointers: true,
            draw_parameters: true,
        }
    }
}

/// Configuration options for translation
#[derive(Debug, Clone, Default)]
pub struct TranslateOptions {
    /// Address UBOs and SSBOs as block index + byte offset instead of derefs.
    pub lower_ubo_ssbo_access_to_offsets: bool,
    /// Address workgroup variables as byte offsets into shared memory.
    pub lower_workgroup_access_to_offsets: bool,
    pub supported_capabilities: Capabilities,
    pub shader_viewport_index_layer_supported: bool,
}

/// Replacement value for the specialization constant decorated `SpecId id`.
///
/// `value` holds the raw bits; only the low 32 bits are read for 32-bit
/// constants, and booleans treat any non-zero value as true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecOverride {
    pub id: u32,
    pub value: u64,
}

/// Translate the entry point `entry` of the given stage.
///
/// This is the main entry point of the crate. `words` is the whole module,
/// header included, in native byte order.
///
/// # Example
/// ```no_run
/// use spvfront::{translate_bytes, ShaderStage, TranslateOptions};
///
/// let bytes = std::fs::read("shader.spv").unwrap();
/// let options = TranslateOptions::default();
/// let shader = translate_bytes(&bytes, ShaderStage::Fragment, "main", &[], &options).unwrap();
/// println!("{shader}");
/// ```
pub fn translate(
    words: &[u32],
    stage: ShaderStage,
    entry: &str,
    specs: &[SpecOverride],
    options: &TranslateOptions,
) -> Result<Shader> {
    translate::Translator::new(words, stage, entry, specs, options)?
        .run()
        .with_context(|| format!("failed to translate entry point \"{entry}\""))
}

/// Like [`translate`], for a module still in bytes. Either byte order is
/// accepted; the magic number decides.
pub fn translate_bytes(
    bytes: &[u8],
    stage: ShaderStage,
    entry: &str,
    specs: &[SpecOverride],
    options: &TranslateOptions,
) -> Result<Shader> {
    let words = parser::words_from_bytes(bytes).context("failed to read SPIR-V words")?;
    translate(&words, stage, entry, specs, options)
}
