use anyhow::Context;
use std::os::fd::AsFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use wayland_client::protocol::{wl_buffer, wl_shm, wl_shm_pool};
use wayland_client::{Dispatch, QueueHandle};

/// Set while the compositor holds the buffer; cleared on `wl_buffer.release`
pub type BusyFlag = Arc<AtomicBool>;

/// Helper for creating and managing shared memory buffers for Wayland
pub struct ShmBuffer {
    pool: wl_shm_pool::WlShmPool,
    buffer: wl_buffer::WlBuffer,
    mmap: memmap2::MmapMut,
    width: u32,
    height: u32,
    busy: BusyFlag,
}

/// Stride and total size of an ARGB8888 buffer
pub fn buffer_layout(width: u32, height: u32) -> anyhow::Result<(i32, i32)> {
    let stride = width
        .checked_mul(4)
        .and_then(|s| i32::try_from(s).ok())
        .context("Buffer too wide")?;
    let size = stride
        .checked_mul(i32::try_from(height).context("Buffer too tall")?)
        .context("Buffer too large")?;
    Ok((stride, size))
}

impl ShmBuffer {
    pub fn new<D>(
        shm: &wl_shm::WlShm,
        width: u32,
        height: u32,
        qh: &QueueHandle<D>,
    ) -> anyhow::Result<Self>
    where
        D: Dispatch<wl_shm_pool::WlShmPool, ()> + Dispatch<wl_buffer::WlBuffer, BusyFlag> + 'static,
    {
        let (stride, size) = buffer_layout(width, height)?;

        let file = tempfile::tempfile()?;
        file.set_len(size as u64)?;

        let mmap = unsafe { memmap2::MmapMut::map_mut(&file)? };

        let pool = shm.create_pool(file.as_fd(), size, qh, ());

        let busy: BusyFlag = Arc::new(AtomicBool::new(false));
        let buffer = pool.create_buffer(
            0,
            width as i32,
            height as i32,
            stride,
            wl_shm::Format::Argb8888,
            qh,
            busy.clone(),
        );

        Ok(Self {
            pool,
            buffer,
            mmap,
            width,
            height,
            busy,
        })
    }

    pub fn fill_color(&mut self, r: u8, g: u8, b: u8, a: u8) {
        let color = [b, g, r, a]; // ARGB8888 format

        for chunk in self.mmap.chunks_exact_mut(4) {
            chunk.copy_from_slice(&color);
        }
    }

    /// Write image data to the buffer
    /// Data must be in ARGB8888 format (BGRA byte order)
    pub fn write_image_data(&mut self, data: &[u8]) -> anyhow::Result<()> {
        if data.len() != self.mmap.len() {
            anyhow::bail!(
                "Image data size mismatch: expected {}, got {}",
                self.mmap.len(),
                data.len()
            );
        }

        self.mmap.copy_from_slice(data);
        Ok(())
    }

    /// Mark as handed to the compositor
    pub fn mark_busy(&self) {
        self.busy.store(true, Ordering::Release);
    }

    pub fn is_released(&self) -> bool {
        !self.busy.load(Ordering::Acquire)
    }

    pub fn buffer(&self) -> &wl_buffer::WlBuffer {
        &self.buffer
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl Drop for ShmBuffer {
    fn drop(&mut self) {
        self.buffer.destroy();
        self.pool.destroy();
    }
}
