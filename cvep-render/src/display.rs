use anyhow::Result;

/// The visible surface. `present` is the buffer swap: it must return only once
/// the frame is committed (vsync-locked on real hardware).
pub trait Display {
    fn size(&self) -> (u32, u32);
    /// RGBA8 back buffer, `width * height * 4` bytes, persistent between presents.
    fn frame_mut(&mut self) -> &mut [u8];
    fn present(&mut self) -> Result<()>;
}

/// In-memory display for dry runs and tests.
///
/// Optionally reads a set of pixels on every present so callers can
/// check what was on screen frame by frame.
#[derive(Debug, Clone)]
pub struct HeadlessDisplay {
    width: u32,
    height: u32,
    frame: Vec<u8>,
    presents: u64,
    sample_points: Vec<(u32, u32)>,
    samples: Vec<Vec<[u8; 4]>>,
}

impl HeadlessDisplay {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame: vec![0; (width * height * 4) as usize],
            presents: 0,
            sample_points: Vec::new(),
            samples: Vec::new(),
        }
    }

    pub fn with_sample_points(mut self, sample_points: Vec<(u32, u32)>) -> Self {
        self.sample_points = sample_points;
        self
    }

    pub fn presents(&self) -> u64 {
        self.presents
    }

    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y * self.width + x) * 4) as usize;
        Some([
            self.frame[i],
            self.frame[i + 1],
            self.frame[i + 2],
            self.frame[i + 3],
        ])
    }

    /// One entry per present, each holding the sample pixels in point order.
    pub fn samples(&self) -> &[Vec<[u8; 4]>] {
        &self.samples
    }
}

impl Display for HeadlessDisplay {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn frame_mut(&mut self) -> &mut [u8] {
        &mut self.frame
    }

    fn present(&mut self) -> Result<()> {
        self.presents += 1;
        if !self.sample_points.is_empty() {
            let sample = self
                .sample_points
                .iter()
                .map(|&(x, y)| self.pixel(x, y).unwrap_or_default())
                .collect();
            self.samples.push(sample);
        }
        Ok(())
    }
}
