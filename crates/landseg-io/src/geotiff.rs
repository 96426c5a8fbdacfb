//! GeoTIFF reading and writing.
//!
//! Pixel data goes through the `tiff` crate; georeferencing is carried in
//! the GeoTIFF tags:
//!
//! | Tag                 | Code  | Content                                   |
//! |---------------------|-------|-------------------------------------------|
//! | ModelPixelScale     | 33550 | `[sx, sy, sz]`                            |
//! | ModelTiepoint       | 33922 | `[i, j, k, x, y, z]`                      |
//! | ModelTransformation | 34264 | 4×4 row-major affine matrix               |
//! | GeoKeyDirectory     | 34735 | `[1, 1, 0, n, (key, loc, count, value)*]` |
//! | GeoDoubleParams     | 34736 | doubles referenced by GeoKeys             |
//! | GeoAsciiParams      | 34737 | `|`-separated citations                   |
//!
//! Only GeoKeys stored inline (location 0) are interpreted, which covers
//! the model type, raster type and EPSG code keys. The three GeoKey tags
//! are also kept verbatim and written back unchanged on derived rasters.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use landseg_pipeline::{
    Crs, Dimensions, GeoKeys, GeoReference, GeoTransform, LabelRaster, MultibandRaster,
    PipelineError, RgbaImage,
};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind, colortype};
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GEO_DOUBLE_PARAMS: u16 = 34736;
const GEO_ASCII_PARAMS: u16 = 34737;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const RASTER_PIXEL_IS_POINT: u16 = 2;
const USER_DEFINED: u16 = 32767;

/// Errors from GeoTIFF reading and writing.
#[derive(Debug, thiserror::Error)]
pub enum GeoTiffError {
    /// The file could not be opened or created.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TIFF structure could not be decoded or encoded.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Decoded samples do not fit the declared dimensions.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Read every band of a GeoTIFF into an `f64` raster.
///
/// # Errors
///
/// Returns [`GeoTiffError::Open`] if the file cannot be opened,
/// [`GeoTiffError::Tiff`] if it is not a readable TIFF, and
/// [`GeoTiffError::Pipeline`] if the sample count does not divide
/// evenly into pixels.
pub fn read_multiband(path: &Path) -> Result<MultibandRaster, GeoTiffError> {
    let file = File::open(path).map_err(|source| GeoTiffError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut decoder = Decoder::new(BufReader::new(file))?.with_limits(Limits::unlimited());
    let (width, height) = decoder.dimensions()?;
    let dimensions = Dimensions { width, height };
    let georef = read_georef(&mut decoder)?;
    let samples = widen(decoder.read_image()?);

    let pixels = dimensions.pixel_count();
    let bands = if pixels == 0 {
        1
    } else {
        (samples.len() / pixels).max(1)
    };
    log::debug!(
        "read {}: {width}x{height}, {bands} band(s), {:?}",
        path.display(),
        georef.crs
    );
    Ok(MultibandRaster::new(dimensions, bands, samples, georef)?)
}

/// Read band 1 of a GeoTIFF as a label raster.
///
/// Samples are truncated to integers; negative and non-finite samples
/// become background (0).
///
/// # Errors
///
/// Same as [`read_multiband`].
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn read_label_raster(path: &Path) -> Result<LabelRaster, GeoTiffError> {
    let raster = read_multiband(path)?;
    let labels = raster
        .samples()
        .chunks_exact(raster.band_count())
        .map(|pixel| {
            let v = pixel[0];
            if v.is_finite() && v > 0.0 {
                v.trunc().min(f64::from(u32::MAX)) as u32
            } else {
                0
            }
        })
        .collect();
    Ok(LabelRaster::new(
        raster.dimensions(),
        labels,
        raster.georef,
    )?)
}

/// Write a label raster as a single-band 32-bit GeoTIFF.
///
/// # Errors
///
/// Returns [`GeoTiffError::Open`] if the file cannot be created and
/// [`GeoTiffError::Tiff`] if encoding fails.
pub fn write_label_raster(path: &Path, raster: &LabelRaster) -> Result<(), GeoTiffError> {
    let dims = raster.dimensions();
    let mut encoder = TiffEncoder::new(create(path)?)?;
    let mut image = encoder.new_image::<colortype::Gray32>(dims.width, dims.height)?;
    write_georef(image.encoder(), &raster.georef)?;
    image.write_data(raster.labels())?;
    log::debug!("wrote label raster {}", path.display());
    Ok(())
}

/// Write an RGBA image as a 4-band 8-bit GeoTIFF.
///
/// # Errors
///
/// Same as [`write_label_raster`].
pub fn write_rgba(path: &Path, image: &RgbaImage, georef: &GeoReference) -> Result<(), GeoTiffError> {
    let mut encoder = TiffEncoder::new(create(path)?)?;
    let mut tiff = encoder.new_image::<colortype::RGBA8>(image.width(), image.height())?;
    write_georef(tiff.encoder(), georef)?;
    tiff.write_data(image.as_raw())?;
    log::debug!("wrote RGBA raster {}", path.display());
    Ok(())
}

fn create(path: &Path) -> Result<BufWriter<File>, GeoTiffError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| GeoTiffError::Open {
            path: path.to_path_buf(),
            source,
        })
}

#[allow(clippy::cast_precision_loss)]
fn widen(result: DecodingResult) -> Vec<f64> {
    match result {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|s| s as f64).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|s| s as f64).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
    }
}

// --- georeferencing --------------------------------------------------------

fn read_georef<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoReference, GeoTiffError> {
    let geokeys = read_geokeys(decoder)?;
    let keys = geokeys
        .as_ref()
        .map(|g| parse_geokeys(&g.directory))
        .unwrap_or_default();
    let transformation = read_f64s(decoder, MODEL_TRANSFORMATION)?;
    let scale = read_f64s(decoder, MODEL_PIXEL_SCALE)?;
    let tiepoint = read_f64s(decoder, MODEL_TIEPOINT)?;

    let mut transform = transform_from_tags(
        transformation.as_deref(),
        scale.as_deref(),
        tiepoint.as_deref(),
    )
    .unwrap_or_else(|| {
        log::warn!("raster carries no georeferencing; using pixel coordinates");
        GeoTransform::IDENTITY
    });
    if keys.get(&GT_RASTER_TYPE) == Some(&RASTER_PIXEL_IS_POINT) {
        // Tiepoints refer to pixel centres; shift to the corner.
        transform.c -= 0.5 * (transform.a + transform.b);
        transform.f -= 0.5 * (transform.d + transform.e);
    }

    Ok(GeoReference {
        transform,
        crs: crs_from_geokeys(&keys),
        geokeys,
    })
}

/// The raw GeoKey tags, if the raster has a key directory.
fn read_geokeys<R: Read + Seek>(
    decoder: &mut Decoder<R>,
) -> Result<Option<GeoKeys>, GeoTiffError> {
    let Some(directory) = decoder.find_tag(tag(GEO_KEY_DIRECTORY))? else {
        return Ok(None);
    };
    let Some(directory) = directory
        .into_u32_vec()?
        .into_iter()
        .map(|v| u16::try_from(v).ok())
        .collect::<Option<Vec<u16>>>()
    else {
        log::warn!("GeoKeyDirectory holds values wider than 16 bits; ignoring it");
        return Ok(None);
    };
    let double_params = read_f64s(decoder, GEO_DOUBLE_PARAMS)?.unwrap_or_default();
    let ascii_params = match decoder.find_tag(tag(GEO_ASCII_PARAMS))? {
        Some(value) => value.into_string()?.trim_end_matches('\0').to_string(),
        None => String::new(),
    };
    Ok(Some(GeoKeys {
        directory,
        double_params,
        ascii_params,
    }))
}

fn read_f64s<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    code: u16,
) -> Result<Option<Vec<f64>>, GeoTiffError> {
    Ok(decoder
        .find_tag(tag(code))?
        .map(tiff::decoder::ifd::Value::into_f64_vec)
        .transpose()?)
}

/// Affine transform from either a full model transformation or a pixel
/// scale plus tiepoint pair.
fn transform_from_tags(
    transformation: Option<&[f64]>,
    scale: Option<&[f64]>,
    tiepoint: Option<&[f64]>,
) -> Option<GeoTransform> {
    if let Some(m) = transformation.filter(|m| m.len() >= 16) {
        return Some(GeoTransform {
            a: m[0],
            b: m[1],
            c: m[3],
            d: m[4],
            e: m[5],
            f: m[7],
        });
    }
    let (scale, tp) = (scale.filter(|s| s.len() >= 2)?, tiepoint.filter(|t| t.len() >= 6)?);
    let (sx, sy) = (scale[0], scale[1]);
    Some(GeoTransform {
        a: sx,
        b: 0.0,
        c: tp[0].mul_add(-sx, tp[3]),
        d: 0.0,
        e: -sy,
        f: tp[1].mul_add(sy, tp[4]),
    })
}

/// Inline GeoKeys as `key -> value`.
fn parse_geokeys(directory: &[u16]) -> HashMap<u16, u16> {
    let Some(&count) = directory.get(3) else {
        return HashMap::new();
    };
    directory
        .get(4..)
        .unwrap_or_default()
        .chunks_exact(4)
        .take(usize::from(count))
        .filter(|entry| entry[1] == 0)
        .map(|entry| (entry[0], entry[3]))
        .collect()
}

fn crs_from_geokeys(keys: &HashMap<u16, u16>) -> Option<Crs> {
    let known = |key| keys.get(&key).copied().filter(|&code| code != USER_DEFINED);
    let crs = match keys.get(&GT_MODEL_TYPE) {
        Some(&MODEL_TYPE_GEOGRAPHIC) => known(GEOGRAPHIC_TYPE).map(Crs::Geographic),
        _ => known(PROJECTED_CS_TYPE)
            .map(Crs::Projected)
            .or_else(|| known(GEOGRAPHIC_TYPE).map(Crs::Geographic)),
    };
    if crs.is_none() && !keys.is_empty() {
        log::warn!("GeoKeys do not name an EPSG code; CRS is unknown");
    }
    crs
}

/// GeoKey directory for `crs`, keys in ascending order.
fn geokeys(crs: Crs) -> Vec<u16> {
    let (model_type, crs_key) = match crs {
        Crs::Geographic(_) => (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE),
        Crs::Projected(_) => (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE),
    };
    vec![
        1, 1, 0, 3, //
        GT_MODEL_TYPE, 0, 1, model_type, //
        GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA, //
        crs_key, 0, 1, crs.epsg(),
    ]
}

/// `directory` with the raster type set to PixelIsArea, matching the
/// corner-anchored transform written next to it.
fn pixel_is_area(directory: &[u16]) -> Vec<u16> {
    let mut out = directory.to_vec();
    if let Some(entries) = out.get_mut(4..) {
        for entry in entries.chunks_exact_mut(4) {
            if entry[0] == GT_RASTER_TYPE && entry[1] == 0 {
                entry[3] = RASTER_PIXEL_IS_AREA;
            }
        }
    }
    out
}

fn write_georef<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<'_, W, K>,
    georef: &GeoReference,
) -> Result<(), GeoTiffError> {
    let t = georef.transform;
    if t.is_rectilinear() {
        dir.write_tag(tag(MODEL_PIXEL_SCALE), &[t.a, -t.e, 0.0][..])?;
        dir.write_tag(tag(MODEL_TIEPOINT), &[0.0, 0.0, 0.0, t.c, t.f, 0.0][..])?;
    } else {
        let matrix = [
            t.a, t.b, 0.0, t.c, //
            t.d, t.e, 0.0, t.f, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        dir.write_tag(tag(MODEL_TRANSFORMATION), &matrix[..])?;
    }
    match (&georef.geokeys, georef.crs) {
        (Some(keys), _) => {
            dir.write_tag(tag(GEO_KEY_DIRECTORY), &pixel_is_area(&keys.directory)[..])?;
            if !keys.double_params.is_empty() {
                dir.write_tag(tag(GEO_DOUBLE_PARAMS), &keys.double_params[..])?;
            }
            if !keys.ascii_params.is_empty() {
                dir.write_tag(tag(GEO_ASCII_PARAMS), keys.ascii_params.as_str())?;
            }
        }
        (None, Some(crs)) => dir.write_tag(tag(GEO_KEY_DIRECTORY), &geokeys(crs)[..])?,
        (None, None) => {}
    }
    Ok(())
}
