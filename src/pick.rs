//! GPU readback and decoding of frame outputs.
//!
//! Offscreen targets are copied into mappable buffers and read back on the
//! render thread:
//! 1. Copy the target into a buffer whose rows are padded to the 256 byte copy alignment
//! 2. Map the buffer and block until the device signals completion
//! 3. Strip the row padding
//! 4. Decode the texels into colour images, linear depth or node ids
//!
//! Node ids are the 1-based position of a node in the frame's node table, `0`
//! marks background pixels. [`NodeIdBuffer`] keeps the table so ids resolve
//! back to scene handles.

use std::time::Duration;

use crate::{
    data_structures::{camera::Camera, scene_graph::NodeHandle},
    error::RenderError,
};

/// Bytes of a row padded to the texture copy alignment.
pub fn padded_bytes_per_row(width: u32, bytes_per_pixel: u32) -> u32 {
    let unpadded = width * bytes_per_pixel;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Removes the per-row padding of a mapped buffer.
pub fn unpad_rows(data: &[u8], width: u32, height: u32, bytes_per_pixel: u32) -> Vec<u8> {
    let row = (width * bytes_per_pixel) as usize;
    let padded = padded_bytes_per_row(width, bytes_per_pixel) as usize;
    let mut out = Vec::with_capacity(row * height as usize);
    for chunk in data.chunks(padded).take(height as usize) {
        out.extend_from_slice(&chunk[..row.min(chunk.len())]);
    }
    out
}

/// A pending copy of a texture into a mappable buffer.
pub struct Readback {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
}

impl Readback {
    /**
     * Records the copy of `texture` into a new buffer.
     *
     * # Arguments
     *
     * * `aspect` selects the depth aspect for depth targets
     * * `bytes_per_pixel` is 4 for all formats the renderer reads back
     */
    pub fn record(
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        texture: &wgpu::Texture,
        aspect: wgpu::TextureAspect,
        (width, height): (u32, u32),
        bytes_per_pixel: u32,
    ) -> Self {
        let padded = padded_bytes_per_row(width, bytes_per_pixel);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            size: (padded * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST
                // this tells wpgu that we want to read this buffer from the cpu
                | wgpu::BufferUsages::MAP_READ,
            label: Some("Readback buffer"),
            mapped_at_creation: false,
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                aspect,
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Self {
            buffer,
            width,
            height,
            bytes_per_pixel,
        }
    }

    /// Blocks until the copy finished and returns the tightly packed texels.
    pub fn read(self, device: &wgpu::Device) -> Result<Vec<u8>, RenderError> {
        let buffer_slice = self.buffer.slice(..);
        // NOTE: We have to create the mapping THEN device.poll() before awaiting
        // the future. Otherwise the thread blocks forever.
        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: Some(Duration::from_secs(3)),
            })
            .map_err(|e| RenderError::Readback(e.to_string()))?;
        futures::executor::block_on(rx.receive())
            .ok_or_else(|| RenderError::Readback("map callback was dropped".into()))?
            .map_err(|e| RenderError::Readback(e.to_string()))?;

        let data = buffer_slice.get_mapped_range();
        let texels = unpad_rows(&data, self.width, self.height, self.bytes_per_pixel);
        drop(data);
        self.buffer.unmap();
        Ok(texels)
    }
}

/// Builds the colour image of a frame from RGBA8 texels.
pub fn color_image(width: u32, height: u32, rgba: Vec<u8>, alpha: bool) -> Result<image::DynamicImage, RenderError> {
    let buffer = image::RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| RenderError::Readback(format!("colour buffer does not hold {width}x{height} texels")))?;
    let image = image::DynamicImage::ImageRgba8(buffer);
    Ok(if alpha {
        image
    } else {
        image::DynamicImage::ImageRgb8(image.to_rgb8())
    })
}

/// Depth per pixel.
///
/// Linear eye-space depth with `0.0` where nothing was drawn, or the stored
/// `[0, 1]` buffer values (`1.0` on the background) when built with
/// [`DepthImage::from_stored_bytes`].
#[derive(Debug, Clone, PartialEq)]
pub struct DepthImage {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl DepthImage {
    /// Linearises stored depth values with the projection of `camera`.
    pub fn from_raw(width: u32, height: u32, raw: &[f32], camera: &Camera) -> Self {
        Self {
            width,
            height,
            data: raw.iter().map(|d| camera.linearize_depth(*d)).collect(),
        }
    }

    pub fn from_bytes(width: u32, height: u32, bytes: &[u8], camera: &Camera) -> Self {
        Self::from_raw(width, height, &parse_f32(bytes), camera)
    }

    /// Keeps the stored depth values as they are.
    pub fn from_stored_bytes(width: u32, height: u32, bytes: &[u8]) -> Self {
        Self {
            width,
            height,
            data: parse_f32(bytes),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get((y * self.width + x) as usize).copied()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

fn parse_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Node ids of a picking pass, resolvable to scene handles.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeIdBuffer {
    width: u32,
    height: u32,
    ids: Vec<u32>,
    table: Vec<NodeHandle>,
}

impl NodeIdBuffer {
    pub fn new(width: u32, height: u32, ids: Vec<u32>, table: Vec<NodeHandle>) -> Self {
        Self {
            width,
            height,
            ids,
            table,
        }
    }

    pub fn from_bytes(width: u32, height: u32, bytes: &[u8], table: Vec<NodeHandle>) -> Self {
        let ids = bytes
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Self::new(width, height, ids, table)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw id at a pixel; `0` is background.
    pub fn id(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.ids.get((y * self.width + x) as usize).copied()
    }

    /// The node drawn at a pixel, `None` for background or out of bounds pixels.
    pub fn get(&self, x: u32, y: u32) -> Option<NodeHandle> {
        let id = self.id(x, y)?;
        let index = id.checked_sub(1)? as usize;
        let node = self.table.get(index).copied();
        if node.is_none() {
            log::warn!("pick id {id} at ({x}, {y}) is outside the node table");
        }
        node
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;

    #[test]
    fn rows_are_padded_to_copy_alignment() {
        assert_eq!(padded_bytes_per_row(64, 4), 256);
        assert_eq!(padded_bytes_per_row(65, 4), 512);
        assert_eq!(padded_bytes_per_row(1, 4), 256);

        let mut data = vec![0u8; 256 * 2];
        data[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data[256..264].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);
        let texels = unpad_rows(&data, 2, 2, 4);
        assert_eq!(texels, (1..=16).collect::<Vec<u8>>());
    }

    #[test]
    fn ids_resolve_through_the_node_table() {
        let mut arena: SlotMap<NodeHandle, ()> = SlotMap::with_key();
        let a = arena.insert(());
        let b = arena.insert(());
        let bytes: Vec<u8> = [0u32, 1, 2, 7].iter().flat_map(|id| id.to_le_bytes()).collect();
        let buffer = NodeIdBuffer::from_bytes(2, 2, &bytes, vec![a, b]);
        assert_eq!(buffer.get(0, 0), None);
        assert_eq!(buffer.get(1, 0), Some(a));
        assert_eq!(buffer.get(0, 1), Some(b));
        // stale ids and out of bounds pixels resolve to nothing
        assert_eq!(buffer.get(1, 1), None);
        assert_eq!(buffer.get(2, 0), None);
        assert_eq!(buffer.id(1, 1), Some(7));
    }

    #[test]
    fn background_depth_is_zero() {
        let camera = Camera::perspective(1.0).with_clip(0.5, Some(10.0));
        let bytes: Vec<u8> = [1.0f32, 0.0].iter().flat_map(|d| d.to_le_bytes()).collect();
        let depth = DepthImage::from_bytes(2, 1, &bytes, &camera);
        assert_eq!(depth.get(0, 0), Some(0.0));
        assert!((depth.get(1, 0).unwrap() - 0.5).abs() < 1e-5);
        assert_eq!(depth.get(0, 1), None);
    }

    #[test]
    fn stored_depth_is_kept_unchanged() {
        let bytes: Vec<u8> = [1.0f32, 0.25, 0.0].iter().flat_map(|d| d.to_le_bytes()).collect();
        let depth = DepthImage::from_stored_bytes(3, 1, &bytes);
        assert_eq!(depth.as_slice(), &[1.0, 0.25, 0.0]);
        assert_eq!(depth.get(1, 0), Some(0.25));
        assert_eq!((depth.width(), depth.height()), (3, 1));
    }

    #[test]
    fn colour_images_drop_alpha_unless_asked() {
        let rgba = vec![10, 20, 30, 40];
        let rgb = color_image(1, 1, rgba.clone(), false).unwrap();
        assert_eq!(rgb.as_bytes(), &[10, 20, 30]);
        let with_alpha = color_image(1, 1, rgba, true).unwrap();
        assert_eq!(with_alpha.as_bytes(), &[10, 20, 30, 40]);
        assert!(color_image(2, 2, vec![0; 4], true).is_err());
    }
}
