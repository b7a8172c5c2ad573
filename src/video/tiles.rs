use crate::error::FrameError;
use crate::frame::{Frame, PixelRect};

/// One tile of a frame: the buffered rectangle that gets processed and the
/// unbuffered rectangle that gets pasted back on reassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    /// Processing rectangle, expanded by the overlap buffers (frame coords)
    pub outer: PixelRect,
    /// Reassembly rectangle, before buffering (frame coords)
    pub inner: PixelRect,
}

/// A tile cut out of a source frame, carrying its own geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Pixels of the outer rectangle
    pub image: Frame,
    pub outer: PixelRect,
    pub inner: PixelRect,
}

impl Fragment {
    /// The inner-rect pixels, relative to this fragment's own image
    pub fn inner_pixels(&self) -> Result<Frame, FrameError> {
        self.image.crop(PixelRect::new(
            self.inner.x - self.outer.x,
            self.inner.y - self.outer.y,
            self.inner.width,
            self.inner.height,
        ))
    }
}

/// Compute the cols x rows tile grid of a width x height frame.
///
/// The trailing column absorbs `width % cols` extra pixels and the trailing
/// row absorbs `height % rows`. Each tile's outer rect is expanded by
/// `horizontal_buffer` / `vertical_buffer` pixels on each side, clamped to
/// the frame. Tiles are emitted column-major (full first column, then the
/// second column, ...).
pub fn tile_layout(
    width: u32,
    height: u32,
    cols: u32,
    rows: u32,
    horizontal_buffer: u32,
    vertical_buffer: u32,
) -> Result<Vec<TileRect>, FrameError> {
    if width == 0 || height == 0 || cols == 0 || rows == 0 || cols > width || rows > height {
        return Err(FrameError::RectOutOfBounds {
            x: 0,
            y: 0,
            width: cols,
            height: rows,
            frame_width: width,
            frame_height: height,
        });
    }

    let col_width = width / cols;
    let row_height = height / rows;
    let col_remainder = width % cols;
    let row_remainder = height % rows;

    let mut tiles = Vec::with_capacity(cols as usize * rows as usize);

    for col in 0..cols {
        let x_pos = col * col_width;

        let mut inner_width = col_width;
        if col == cols - 1 {
            inner_width += col_remainder;
        }

        let outer_x = x_pos.saturating_sub(horizontal_buffer);
        let outer_right = (x_pos + inner_width + horizontal_buffer).min(width);

        for row in 0..rows {
            let y_pos = row * row_height;

            let mut inner_height = row_height;
            if row == rows - 1 {
                inner_height += row_remainder;
            }

            let outer_y = y_pos.saturating_sub(vertical_buffer);
            let outer_bottom = (y_pos + inner_height + vertical_buffer).min(height);

            tiles.push(TileRect {
                outer: PixelRect::new(outer_x, outer_y, outer_right - outer_x, outer_bottom - outer_y),
                inner: PixelRect::new(x_pos, y_pos, inner_width, inner_height),
            });
        }
    }

    Ok(tiles)
}

/// Cut a frame into fragments following a tile layout.
pub fn tile_frame(frame: &Frame, layout: &[TileRect]) -> Result<Vec<Fragment>, FrameError> {
    let mut fragments = Vec::with_capacity(layout.len());

    for tile in layout {
        fragments.push(Fragment {
            image: frame.crop(tile.outer)?,
            outer: tile.outer,
            inner: tile.inner,
        });
    }

    Ok(fragments)
}
