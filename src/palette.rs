pub type Rgb = [u8; 3];

pub const PALETTE_SIZE: usize = 16;

/// Display colors, addressed by index everywhere else in the server.
pub const PALETTE: [Rgb; PALETTE_SIZE] = [
    [0xFF, 0xFF, 0xFF],
    [0xE4, 0xE4, 0xE4],
    [0x88, 0x88, 0x88],
    [0x22, 0x22, 0x22],
    [0xFF, 0xA7, 0xD1],
    [0xE5, 0x00, 0x00],
    [0xE5, 0x95, 0x00],
    [0xA0, 0x6A, 0x42],
    [0xE5, 0xD9, 0x00],
    [0x94, 0xE0, 0x44],
    [0x02, 0xBE, 0x01],
    [0x00, 0xD3, 0xDD],
    [0x00, 0x83, 0xC7],
    [0x00, 0x00, 0xEA],
    [0xCF, 0x6E, 0xE4],
    [0x82, 0x00, 0x80],
];

pub fn is_valid_index(index: u8) -> bool {
    (index as usize) < PALETTE_SIZE
}

pub fn rgb(index: u8) -> Option<Rgb> {
    PALETTE.get(index as usize).copied()
}

/// Closest palette entry by squared euclidean distance. Exact ties go to the
/// lower index.
pub fn nearest_index(color: Rgb) -> u8 {
    nearest_in(&PALETTE, color) as u8
}

fn nearest_in(palette: &[Rgb], color: Rgb) -> usize {
    let mut best = 0;
    let mut best_distance = u32::MAX;

    for (index, candidate) in palette.iter().enumerate() {
        let distance = squared_distance(color, *candidate);
        if distance < best_distance {
            best = index;
            best_distance = distance;
        }
    }

    best
}

fn squared_distance(a: Rgb, b: Rgb) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as i32 - y as i32;
            (d * d) as u32
        })
        .sum()
}
