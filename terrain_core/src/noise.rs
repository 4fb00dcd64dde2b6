//! Deterministic lattice value noise.
//!
//! Every layer is a pure function of `(x, y, seed)`, so the same seed always
//! yields the same field regardless of evaluation order or thread count.

/// One fractal noise layer evaluated in grid-cell coordinates.
#[derive(Debug, Clone, Copy)]
pub struct NoiseLayer {
    /// Lattice cells per grid cell.
    pub frequency: f32,
    pub octaves: u32,
    pub lacunarity: f32,
    pub gain: f32,
    pub seed: u32,
}

impl NoiseLayer {
    /// Layer whose base wavelength spans `wavelength` grid cells.
    pub fn with_wavelength(wavelength: f32, octaves: u32, seed: u32) -> Self {
        Self {
            frequency: 1.0 / wavelength.max(1.0),
            octaves: octaves.max(1),
            lacunarity: 2.0,
            gain: 0.5,
            seed,
        }
    }

    pub fn lacunarity(mut self, lacunarity: f32) -> Self {
        self.lacunarity = lacunarity;
        self
    }

    pub fn gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    /// Sample in `[0, 1]` at grid position `(x, y)`.
    #[inline]
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        fbm_noise(
            x * self.frequency,
            y * self.frequency,
            self.octaves,
            self.lacunarity,
            self.gain,
            self.seed,
        )
    }

    /// Fill an `size × size` raster row by row.
    pub fn raster(&self, size: u32) -> Vec<f32> {
        let mut values = Vec::with_capacity((size as usize) * (size as usize));
        for y in 0..size {
            for x in 0..size {
                values.push(self.sample(x as f32, y as f32));
            }
        }
        values
    }
}

pub fn fbm_noise(x: f32, y: f32, octaves: u32, lacunarity: f32, gain: f32, seed: u32) -> f32 {
    let mut frequency = 1.0;
    let mut amplitude = 1.0;
    let mut sum = 0.0;
    let mut normaliser = 0.0;
    for i in 0..octaves {
        // Offset each octave so lattice points do not line up at the origin.
        let shift = i as f32 * 17.31;
        let s = seed.wrapping_add(i.wrapping_mul(0x9E37_79B9));
        sum += value_noise(x * frequency + shift, y * frequency - shift, s) * amplitude;
        normaliser += amplitude;
        frequency *= lacunarity;
        amplitude *= gain;
    }
    if normaliser <= 0.0 {
        return 0.5;
    }
    (sum / normaliser).clamp(0.0, 1.0)
}

pub fn value_noise(x: f32, y: f32, seed: u32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let xf = x - x0 as f32;
    let yf = y - y0 as f32;

    let v00 = hash2(x0, y0, seed);
    let v10 = hash2(x0 + 1, y0, seed);
    let v01 = hash2(x0, y0 + 1, seed);
    let v11 = hash2(x0 + 1, y0 + 1, seed);

    let sx = smooth_step(xf);
    let i1 = lerp(v00, v10, sx);
    let i2 = lerp(v01, v11, sx);
    lerp(i1, i2, smooth_step(yf))
}

/// Quintic fade; C2-continuous so slopes have no lattice creases.
#[inline]
fn smooth_step(t: f32) -> f32 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn hash2(x: i32, y: i32, seed: u32) -> f32 {
    let mut n = x as u32;
    n = n.wrapping_mul(0x6C8E_9CF5) ^ (y as u32).wrapping_mul(0xB529_7A4D) ^ seed;
    n ^= n >> 13;
    n = n.wrapping_mul(0x1B56_C4E9);
    n ^= n >> 11;
    ((n >> 8) & 0xFFFF) as f32 / 65535.0
}

/// Derive a 32-bit layer seed from the run seed and a per-layer salt.
pub fn mix_seed(base: u32, seed: u64, salt: u32) -> u32 {
    let seed_low = seed as u32;
    let seed_high = (seed >> 32) as u32;
    base ^ seed_low.rotate_left(7) ^ seed_high.rotate_left(11) ^ salt
}
