use std::{
    fs,
    io::{BufReader, Read},
    path::Path,
};

use anyhow::{bail, ensure, Context, Result};
use json_pretty_compact::PrettyCompactFormatter;
use log::info;
use png::{BitDepth, ColorType, Compression, Transformations};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Serializer;

use crate::texture::PixelBuffer;

pub fn to_json_bytes<T: Serialize>(data: &T) -> Result<Vec<u8>> {
    let formatter = PrettyCompactFormatter::new();
    let mut data_bytes = vec![];
    let mut ser = Serializer::with_formatter(&mut data_bytes, formatter);
    data.serialize(&mut ser)?;
    Ok(data_bytes)
}

pub fn save_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    info!("Saving {}", path.display());
    write_file(path, &to_json_bytes(data)?)
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    info!("Loading {}", path.display());
    let data_bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let data: T = serde_json::from_slice(&data_bytes)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(data)
}

pub fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Decodes a PNG of any color type into a 32bpp buffer of RGBA texels.
pub fn decode_png<R: Read>(reader: R) -> Result<PixelBuffer> {
    let mut decoder = png::Decoder::new(reader);
    decoder.set_transformations(Transformations::normalize_to_color8());
    let mut reader = decoder.read_info()?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut buf)?;
    let data = &buf[..frame.buffer_size()];

    let (color_type, _) = reader.output_color_type();
    let rgba: Vec<u8> = match color_type {
        ColorType::Rgba => data.to_vec(),
        ColorType::Rgb => data
            .chunks_exact(3)
            .flat_map(|c| [c[0], c[1], c[2], 0xff])
            .collect(),
        ColorType::GrayscaleAlpha => data
            .chunks_exact(2)
            .flat_map(|c| [c[0], c[0], c[0], c[1]])
            .collect(),
        ColorType::Grayscale => data.iter().flat_map(|&g| [g, g, g, 0xff]).collect(),
        ColorType::Indexed => bail!("Indexed PNG was not expanded"),
    };
    PixelBuffer::from_true_color(frame.width, frame.height, &rgba)
}

pub fn load_png(path: &Path) -> Result<PixelBuffer> {
    info!("Loading {}", path.display());
    let file = fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    decode_png(BufReader::new(file)).with_context(|| format!("decoding {}", path.display()))
}

/// Encodes raw RGBA8 data as a PNG file image.
pub fn encode_png(width: u32, height: u32, rgba: &[u8]) -> Result<Vec<u8>> {
    ensure!(
        rgba.len() == width as usize * height as usize * 4,
        "RGBA data has {} bytes, expected {}x{}x4",
        rgba.len(),
        width,
        height
    );
    let mut bytes = vec![];
    let mut encoder = png::Encoder::new(&mut bytes, width, height);
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    encoder.set_compression(Compression::Best);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(rgba)?;
    writer.finish()?;
    Ok(bytes)
}

/// Bit-packs `texture` (`32 / depth` texels per RGBA pixel) and encodes it as PNG.
pub fn encode_texture(texture: &PixelBuffer) -> Result<Vec<u8>> {
    let width = texture.packed_width()?;
    encode_png(width, texture.height(), &texture.pack()?)
}

/// Inverse of `encode_texture` for a texture of the given logical depth.
pub fn decode_texture(bytes: &[u8], depth: u32) -> Result<PixelBuffer> {
    let image = decode_png(bytes)?;
    PixelBuffer::unpack(image.width(), image.height(), depth, &image.pack()?)
}

pub fn save_png(path: &Path, texture: &PixelBuffer) -> Result<()> {
    info!("Saving {}", path.display());
    write_file(path, &encode_texture(texture)?)
}
