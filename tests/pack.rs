use std::fs;

use itertools::iproduct;
use vdp_packer::{
    baker::{Baker, Placement},
    bundle::{Bundle, ImageSource, MANIFEST_FILE, MAPS_FILE, PALETTES_FILE, SPRITES_FILE},
    config::{ColorMode, PackConfig},
    diagnostics::Diagnostics,
    helpers::{alpha, pack_rgba},
    map::Map,
    palette::{posterize, Palette},
    persist::{decode_png, decode_texture, save_png},
    project::Project,
    texture::PixelBuffer,
    tiles::{Tileset, TilesetOptions},
};

fn gradient(w: u32, h: u32, seed: u32) -> PixelBuffer {
    let mut img = PixelBuffer::new(w, h, 32).unwrap();
    for (y, x) in iproduct!(0..h, 0..w) {
        let v = (x * 37 + y * 11 + seed * 5) % 6;
        let color = if v == 0 {
            0
        } else {
            pack_rgba((v * 40) as u8, (v * 20) as u8, 0x80, 0xff)
        };
        img.set(x, y, color).unwrap();
    }
    img
}

fn build(config: PackConfig) -> Bundle {
    let mut bundle = Bundle::new(config).unwrap();
    bundle.create_palette("main", 0, 1).unwrap();
    bundle.create_palette("other", 0, 1).unwrap();
    bundle
        .create_sprite("main", "hero", &ImageSource::Buffer(gradient(12, 16, 1)))
        .unwrap();
    bundle
        .create_sprite("other", "coin", &ImageSource::Buffer(gradient(8, 8, 2)))
        .unwrap();
    bundle
        .create_tileset("main", "ground", &ImageSource::Blank(8, 8), 8, 8, &TilesetOptions::default())
        .unwrap();
    bundle
        .create_map("ground", "level", &ImageSource::Buffer(gradient(64, 32, 3)), 0)
        .unwrap();
    bundle
}

#[test]
fn packing_is_deterministic() {
    let first = build(PackConfig::default()).pack().unwrap();
    let second = build(PackConfig::default()).pack().unwrap();
    assert_eq!(first.files(), second.files());
}

#[test]
fn written_bundle_decodes_back_to_atlases() {
    let dir = tempfile::tempdir().unwrap();
    let config = PackConfig {
        color_mode: ColorMode::Hi,
        ..Default::default()
    };
    let packed = build(config.clone()).pack().unwrap();
    packed.write_to(dir.path()).unwrap();

    for name in [MANIFEST_FILE, SPRITES_FILE, MAPS_FILE, PALETTES_FILE] {
        assert!(dir.path().join(name).exists(), "{} missing", name);
    }
    assert!(!dir.path().join("sample.png").exists());

    let sprites = decode_texture(&fs::read(dir.path().join(SPRITES_FILE)).unwrap(), 8).unwrap();
    assert_eq!(sprites, packed.sprite_atlas);
    assert_eq!(sprites.width(), config.sprite_atlas().width);
    let maps = decode_texture(&fs::read(dir.path().join(MAPS_FILE)).unwrap(), 16).unwrap();
    assert_eq!(maps, packed.map_atlas);
    let palettes = decode_png(&fs::read(dir.path().join(PALETTES_FILE)).unwrap()[..]).unwrap();
    assert_eq!(palettes, packed.palette_atlas);

    let manifest: serde_json::Value =
        serde_json::from_slice(&fs::read(dir.path().join(MANIFEST_FILE)).unwrap()).unwrap();
    assert_eq!(manifest["sprites"]["hero"]["hicol"], 1);
    assert_eq!(manifest["maps"]["level"]["til"], "ground");
    assert_eq!(manifest["pals"]["other"]["y"], 1);
}

#[test]
fn sprites_render_back_to_their_source_colors() {
    let packed = build(PackConfig::default()).pack().unwrap();
    let bundle = build(PackConfig::default());
    let record = &packed.manifest.sprites["hero"];
    let palette = bundle.palette_named(&record.pal).unwrap();
    let source = gradient(12, 16, 1);
    for (y, x) in iproduct!(0..record.h, 0..record.w) {
        let texel = packed
            .sprite_atlas
            .get((record.x + x) as i64, (record.y + y) as i64);
        let expected = source.get(x as i64, y as i64);
        let color = palette.row(0)[texel as usize];
        if alpha(expected) == 0 {
            assert_eq!(texel, 0);
        } else {
            assert_eq!(color, posterize(expected, 4));
        }
    }
}

#[test]
fn representable_colors_survive_quantize_and_bake() {
    for bits in [2u32, 3, 4, 5, 8] {
        let config = PackConfig {
            palette_bpp: bits,
            color_mode: ColorMode::Hi,
            ..Default::default()
        };
        let mut palette = Palette::new("p", 0, 1, &config).unwrap();
        let colors: Vec<u32> = [0xff34_5678u32, 0xffa0_b0c0, 0xff00_0000, 0xffff_ffff]
            .iter()
            .map(|&c| posterize(c, bits))
            .collect();
        let mut indices = vec![];
        for &c in &colors {
            indices.push(palette.quantize(c, true, 0).unwrap().index.unwrap());
        }
        let mut dest = PixelBuffer::new(256, 1, 32).unwrap();
        palette.bake_into(&mut dest, 0, 0).unwrap();
        for (c, i) in colors.iter().zip(indices) {
            assert_eq!(dest.get(i as i64, 0), *c, "bits {}", bits);
        }
    }
}

#[test]
fn index_zero_stays_transparent_in_every_row() {
    let mut palette = Palette::new("p", 4, 3, &PackConfig::default()).unwrap();
    for row in 0..3 {
        for c in [0xff11_2233u32, 0x0000_0000, 0x00ff_ffff, 0xff44_5566, 0xff77_8899, 0xffaa_bbcc] {
            palette.quantize(c, true, row).unwrap();
        }
    }
    for row in 0..3 {
        assert_eq!(alpha(palette.row(row)[0]), 0);
        assert!(palette.row(row)[1..].iter().all(|&c| alpha(c) != 0));
    }
}

#[test]
fn four_color_palette_falls_back_after_three_colors() {
    let mut palette = Palette::new("p", 4, 1, &PackConfig::default()).unwrap();
    let mut diag = Diagnostics::new();
    let mut img = PixelBuffer::new(4, 1, 32).unwrap();
    for (x, c) in [0xff00_00ffu32, 0xff00_ff00, 0xffff_0000, 0xffff_ffff].iter().enumerate() {
        img.set(x as u32, 0, *c).unwrap();
    }
    let tile = vdp_packer::tiles::Tile::from_image(&img, &mut palette, &mut diag).unwrap();
    assert_eq!(&tile.pixels[..3], &[1, 2, 3]);
    assert!((1..=3).contains(&tile.pixels[3]));
    assert_eq!(palette.row(0).len(), 4);
    assert_eq!(diag.warnings().len(), 1);
}

#[test]
fn identical_quadrants_make_a_single_tile_map() {
    let mut palette = Palette::new("p", 0, 1, &PackConfig::default()).unwrap();
    let mut diag = Diagnostics::new();
    let mut tileset = Tileset::blank("t", 16, 16, 2, 2, false).unwrap();
    let mut img = PixelBuffer::new(32, 32, 32).unwrap();
    for (y, x) in iproduct!(0..32u32, 0..32u32) {
        let c = if (x % 16) * (y % 16) % 5 == 0 { 0xff20_4060 } else { 0xff00_0000 };
        img.set(x, y, c).unwrap();
    }
    let map = Map::from_image("m", &img, &mut tileset, &mut palette, 0, &mut diag).unwrap();
    assert_eq!(tileset.tiles().len(), 1);
    assert!(map.cells().pixels().iter().all(|&c| c == 0));
}

#[test]
fn two_wide_sprites_wrap_to_a_new_line() {
    let mut atlas = PixelBuffer::new(16, 32, 4).unwrap();
    let mut baker = Baker::new(&mut atlas, 8);
    let first = baker.bake(10, 10, "a", |_, _, _| Ok(())).unwrap();
    let second = baker.bake(10, 10, "b", |_, _, _| Ok(())).unwrap();
    assert_eq!(first, Placement { x: 0, y: 0, w: 10, h: 10 });
    assert_eq!(second, Placement { x: 0, y: 10, w: 10, h: 10 });
}

#[test]
fn failed_pack_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    save_png(&dir.path().join("ok.png"), &gradient(8, 8, 0)).unwrap();
    save_png(&dir.path().join("too_tall.png"), &gradient(8, 1025, 0)).unwrap();
    let json = r#"{
        "output": "out",
        "palettes": [{
            "name": "p",
            "sprites": [{"name": "ok", "image": "ok.png"}, {"name": "too_tall", "image": "too_tall.png"}]
        }]
    }"#;
    let path = dir.path().join("project.json");
    fs::write(&path, json).unwrap();

    let project = Project::load(&path).unwrap();
    let out_dir = project.output_dir();
    let bundle = project.build().unwrap();
    let result = bundle.pack().and_then(|packed| packed.write_to(&out_dir));
    let err = result.unwrap_err();
    assert!(format!("{:#}", err).contains("too_tall"));
    assert!(!out_dir.exists());

    // The same project minus the oversized sprite writes its files there.
    let mut project = project;
    project.palettes[0].sprites.truncate(1);
    let packed = project.build().unwrap().pack().unwrap();
    packed.write_to(&out_dir).unwrap();
    assert!(out_dir.join(MANIFEST_FILE).exists());
}
