// Compute kernel loading
//
// The kernel is an opaque SPIR-V binary: a flat stream of 32-bit words.
// Its entry point and workgroup size are a fixed contract with the
// dispatcher (see pipeline.rs), nothing is reflected from the binary.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::VulkanDevice;

/// Read the kernel binary at `path` into words.
pub fn read_kernel(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read compute kernel {:?}", path))?;
    kernel_words(&bytes).with_context(|| format!("Invalid compute kernel {:?}", path))
}

/// Decode a kernel binary. Its size must be a positive multiple of 4 bytes.
pub fn kernel_words(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        anyhow::bail!("kernel size {} is not a positive multiple of 4 bytes", bytes.len());
    }
    Ok(ash::util::read_spv(&mut Cursor::new(bytes))?)
}

pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_are_read_in_order() {
        let bytes: Vec<u8> = [0x0723_0203u32, 0x0001_0000]
            .iter()
            .flat_map(|word| word.to_ne_bytes())
            .collect();
        assert_eq!(kernel_words(&bytes).unwrap(), vec![0x0723_0203, 0x0001_0000]);
    }

    #[test]
    fn empty_kernel_is_rejected() {
        assert!(kernel_words(&[]).is_err());
    }

    #[test]
    fn truncated_word_is_rejected() {
        let err = kernel_words(&[1, 2, 3, 4, 5, 6]).unwrap_err();
        assert!(err.to_string().contains("multiple of 4"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = read_kernel(Path::new("does/not/exist.spv")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read compute kernel"));
    }
}
