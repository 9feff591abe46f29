mod bitmap_page;
mod catalog_meta_page;
mod disk_meta_page;
mod index_roots_page;

pub use bitmap_page::*;
pub use catalog_meta_page::*;
pub use disk_meta_page::*;
pub use index_roots_page::*;

/// Reads a little-endian u32 at `offset`.
#[inline]
pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Writes a little-endian u32 at `offset`.
#[inline]
pub(crate) fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
