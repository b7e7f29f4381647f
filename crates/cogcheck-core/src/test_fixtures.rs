//! Fixtures for unit and CLI integration tests.
//!
//! `GeoTiffBuilder` writes little-endian classic TIFF files byte by byte:
//! uncompressed float32 samples, tiled or stripped, with optional reduced
//! resolution overviews and the GeoTIFF tags the metadata extractor reads.
//! `ScriptedService` is an in-memory conversion service that replays
//! scripted job state sequences and writes scripted output files.

use crate::service::{
    ConversionRequest, ConversionService, JobId, JobLink, JobState, JobStatus, ServiceError,
};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const TYPE_ASCII: u16 = 2;
const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;
const TYPE_DOUBLE: u16 = 12;

const TAG_NEW_SUBFILE_TYPE: u16 = 254;
const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_PHOTOMETRIC: u16 = 262;
const TAG_STRIP_OFFSETS: u16 = 273;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_ROWS_PER_STRIP: u16 = 278;
const TAG_STRIP_BYTE_COUNTS: u16 = 279;
const TAG_PLANAR_CONFIGURATION: u16 = 284;
const TAG_TILE_WIDTH: u16 = 322;
const TAG_TILE_LENGTH: u16 = 323;
const TAG_TILE_OFFSETS: u16 = 324;
const TAG_TILE_BYTE_COUNTS: u16 = 325;
const TAG_SAMPLE_FORMAT: u16 = 339;
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_MODEL_TRANSFORMATION: u16 = 34264;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const SUBFILE_REDUCED_RESOLUTION: u32 = 1;
const BYTES_PER_SAMPLE: usize = 4;

#[derive(Debug, Clone)]
struct Entry {
    tag: u16,
    field_type: u16,
    count: u32,
    data: Vec<u8>,
}

impl Entry {
    fn shorts(tag: u16, values: &[u16]) -> Self {
        Self {
            tag,
            field_type: TYPE_SHORT,
            count: values.len() as u32,
            data: values.iter().flat_map(|value| value.to_le_bytes()).collect(),
        }
    }

    fn longs(tag: u16, values: &[u32]) -> Self {
        Self {
            tag,
            field_type: TYPE_LONG,
            count: values.len() as u32,
            data: values.iter().flat_map(|value| value.to_le_bytes()).collect(),
        }
    }

    fn doubles(tag: u16, values: &[f64]) -> Self {
        Self {
            tag,
            field_type: TYPE_DOUBLE,
            count: values.len() as u32,
            data: values.iter().flat_map(|value| value.to_le_bytes()).collect(),
        }
    }

    fn ascii(tag: u16, text: &str) -> Self {
        let mut data = text.as_bytes().to_vec();
        data.push(0);
        Self {
            tag,
            field_type: TYPE_ASCII,
            count: data.len() as u32,
            data,
        }
    }

    fn out_of_line_len(&self) -> usize {
        if self.data.len() <= 4 {
            0
        } else {
            self.data.len() + self.data.len() % 2
        }
    }
}

#[derive(Debug, Clone)]
struct ImageSpec {
    width: u32,
    height: u32,
    subfile_type: u32,
    samples: Vec<f32>,
}

/// Builder for uncompressed float32 GeoTIFF files.
#[derive(Debug, Clone)]
pub struct GeoTiffBuilder {
    width: u32,
    height: u32,
    bands: u16,
    tile: Option<(u32, u32)>,
    rows_per_strip: Option<u32>,
    samples: Vec<f32>,
    overviews: Vec<(u32, u32)>,
    nodata: Option<String>,
    geokeys: Vec<(u16, u16)>,
    pixel_scale: Option<[f64; 3]>,
    tiepoint: Option<[f64; 6]>,
    transformation: Option<[f64; 16]>,
    ifds_after_data: bool,
}

impl GeoTiffBuilder {
    /// Single-band image filled with `row * width + column`.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bands: 1,
            tile: None,
            rows_per_strip: None,
            samples: default_samples(width, height, 1),
            overviews: Vec::new(),
            nodata: None,
            geokeys: Vec::new(),
            pixel_scale: None,
            tiepoint: None,
            transformation: None,
            ifds_after_data: false,
        }
    }

    /// Band `b` is filled with `b * 10_000 + row * width + column`.
    #[must_use]
    pub fn bands(mut self, bands: u16) -> Self {
        self.bands = bands.max(1);
        self.samples = default_samples(self.width, self.height, self.bands);
        self
    }

    #[must_use]
    pub fn tiled(mut self, tile_width: u32, tile_height: u32) -> Self {
        self.tile = Some((tile_width, tile_height));
        self
    }

    #[must_use]
    pub fn rows_per_strip(mut self, rows: u32) -> Self {
        self.tile = None;
        self.rows_per_strip = Some(rows.max(1));
        self
    }

    /// Replaces every sample; values are pixel-interleaved.
    #[must_use]
    pub fn samples(mut self, samples: Vec<f32>) -> Self {
        assert_eq!(
            samples.len(),
            self.width as usize * self.height as usize * self.bands as usize,
            "sample count must match width * height * bands"
        );
        self.samples = samples;
        self
    }

    #[must_use]
    pub fn fill(mut self, value: f32) -> Self {
        self.samples.iter_mut().for_each(|sample| *sample = value);
        self
    }

    #[must_use]
    pub fn set_value(mut self, band: u16, row: u32, column: u32, value: f32) -> Self {
        let index = (row as usize * self.width as usize + column as usize) * self.bands as usize
            + band as usize;
        self.samples[index] = value;
        self
    }

    /// Adds a reduced resolution level, sampled nearest-neighbour from the
    /// full resolution image and tiled like it.
    #[must_use]
    pub fn overview(mut self, width: u32, height: u32) -> Self {
        self.overviews.push((width, height));
        self
    }

    /// GDAL_NODATA text, written as-is.
    #[must_use]
    pub fn nodata(mut self, text: &str) -> Self {
        self.nodata = Some(text.to_string());
        self
    }

    #[must_use]
    pub fn geographic(mut self, epsg: u16) -> Self {
        self.geokeys.push((1024, 2));
        self.geokeys.push((1025, 1));
        self.geokeys.push((2048, epsg));
        self
    }

    #[must_use]
    pub fn projected(mut self, epsg: u16) -> Self {
        self.geokeys.push((1024, 1));
        self.geokeys.push((1025, 1));
        self.geokeys.push((3072, epsg));
        self
    }

    #[must_use]
    pub fn pixel_is_point(mut self) -> Self {
        self.geokeys.retain(|(key, _)| *key != 1025);
        self.geokeys.push((1025, 2));
        self
    }

    #[must_use]
    pub fn pixel_scale_and_tiepoint(
        mut self,
        scale_x: f64,
        scale_y: f64,
        origin_x: f64,
        origin_y: f64,
    ) -> Self {
        self.pixel_scale = Some([scale_x, scale_y, 0.0]);
        self.tiepoint = Some([0.0, 0.0, 0.0, origin_x, origin_y, 0.0]);
        self
    }

    /// Writes `ModelTransformationTag` from rasterio-ordered coefficients.
    #[must_use]
    pub fn model_transformation(mut self, coefficients: [f64; 6]) -> Self {
        let [a, b, c, d, e, f] = coefficients;
        self.transformation = Some([
            a, b, 0.0, c, //
            d, e, 0.0, f, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ]);
        self
    }

    /// Places every IFD after the pixel data instead of right after the header.
    #[must_use]
    pub fn ifds_after_data(mut self) -> Self {
        self.ifds_after_data = true;
        self
    }

    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.build())
    }

    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let images = self.images();
        let block_sets = images
            .iter()
            .map(|image| self.encode_blocks(image))
            .collect::<Vec<_>>();

        // Entry sizes do not depend on offset values, so measure with zeros.
        let metadata_len = images
            .iter()
            .zip(&block_sets)
            .enumerate()
            .map(|(index, (image, blocks))| {
                ifd_region_len(&self.entries(image, index == 0, &vec![0; blocks.len()], blocks))
            })
            .sum::<usize>();
        let data_len = block_sets
            .iter()
            .flat_map(|blocks| blocks.iter().map(Vec::len))
            .sum::<usize>();

        let header_len = 8;
        let (metadata_start, data_start) = if self.ifds_after_data {
            (header_len + data_len, header_len)
        } else {
            (header_len, header_len + metadata_len)
        };

        // Smallest overview first, full resolution last.
        let mut data = Vec::with_capacity(data_len);
        let mut block_offsets = vec![Vec::new(); images.len()];
        for index in (0..images.len()).rev() {
            for block in &block_sets[index] {
                block_offsets[index].push((data_start + data.len()) as u32);
                data.extend_from_slice(block);
            }
        }

        let mut metadata = Vec::with_capacity(metadata_len);
        for (index, image) in images.iter().enumerate() {
            let entries = self.entries(image, index == 0, &block_offsets[index], &block_sets[index]);
            let ifd_start = metadata_start + metadata.len();
            let next_ifd = if index + 1 < images.len() {
                (ifd_start + ifd_region_len(&entries)) as u32
            } else {
                0
            };
            metadata.extend(encode_ifd(&entries, ifd_start, next_ifd));
        }

        let mut bytes = Vec::with_capacity(header_len + metadata_len + data_len);
        bytes.extend_from_slice(b"II");
        bytes.extend_from_slice(&42u16.to_le_bytes());
        bytes.extend_from_slice(&(metadata_start as u32).to_le_bytes());
        if self.ifds_after_data {
            bytes.extend(data);
            bytes.extend(metadata);
        } else {
            bytes.extend(metadata);
            bytes.extend(data);
        }
        bytes
    }

    fn images(&self) -> Vec<ImageSpec> {
        let mut images = vec![ImageSpec {
            width: self.width,
            height: self.height,
            subfile_type: 0,
            samples: self.samples.clone(),
        }];
        for &(width, height) in &self.overviews {
            images.push(ImageSpec {
                width,
                height,
                subfile_type: SUBFILE_REDUCED_RESOLUTION,
                samples: self.downsample(width, height),
            });
        }
        images
    }

    fn downsample(&self, width: u32, height: u32) -> Vec<f32> {
        let bands = self.bands as usize;
        let mut samples = Vec::with_capacity(width as usize * height as usize * bands);
        for row in 0..height as usize {
            let source_row = row * self.height as usize / height.max(1) as usize;
            for column in 0..width as usize {
                let source_column = column * self.width as usize / width.max(1) as usize;
                let start = (source_row * self.width as usize + source_column) * bands;
                samples.extend_from_slice(&self.samples[start..start + bands]);
            }
        }
        samples
    }

    fn encode_blocks(&self, image: &ImageSpec) -> Vec<Vec<u8>> {
        let bands = self.bands as usize;
        let width = image.width as usize;
        let height = image.height as usize;

        match self.tile {
            Some((tile_width, tile_height)) => {
                let (tile_width, tile_height) = (tile_width as usize, tile_height as usize);
                let mut blocks = Vec::new();
                for tile_row in 0..height.div_ceil(tile_height) {
                    for tile_column in 0..width.div_ceil(tile_width) {
                        let mut block =
                            Vec::with_capacity(tile_width * tile_height * bands * BYTES_PER_SAMPLE);
                        for local_row in 0..tile_height {
                            for local_column in 0..tile_width {
                                let row = tile_row * tile_height + local_row;
                                let column = tile_column * tile_width + local_column;
                                for band in 0..bands {
                                    let value = if row < height && column < width {
                                        image.samples[(row * width + column) * bands + band]
                                    } else {
                                        0.0
                                    };
                                    block.extend_from_slice(&value.to_le_bytes());
                                }
                            }
                        }
                        blocks.push(block);
                    }
                }
                blocks
            }
            None => {
                let rows = self.rows_for(image) as usize;
                image
                    .samples
                    .chunks(rows * width * bands)
                    .map(|strip| strip.iter().flat_map(|value| value.to_le_bytes()).collect())
                    .collect()
            }
        }
    }

    fn rows_for(&self, image: &ImageSpec) -> u32 {
        self.rows_per_strip
            .unwrap_or(image.height)
            .clamp(1, image.height.max(1))
    }

    fn entries(
        &self,
        image: &ImageSpec,
        is_main: bool,
        block_offsets: &[u32],
        blocks: &[Vec<u8>],
    ) -> Vec<Entry> {
        let bands = self.bands as usize;
        let byte_counts = blocks
            .iter()
            .map(|block| block.len() as u32)
            .collect::<Vec<_>>();

        let mut entries = Vec::new();
        if image.subfile_type != 0 {
            entries.push(Entry::longs(TAG_NEW_SUBFILE_TYPE, &[image.subfile_type]));
        }
        entries.push(Entry::longs(TAG_IMAGE_WIDTH, &[image.width]));
        entries.push(Entry::longs(TAG_IMAGE_LENGTH, &[image.height]));
        entries.push(Entry::shorts(TAG_BITS_PER_SAMPLE, &vec![32; bands]));
        entries.push(Entry::shorts(TAG_COMPRESSION, &[1]));
        entries.push(Entry::shorts(TAG_PHOTOMETRIC, &[1]));
        entries.push(Entry::shorts(TAG_SAMPLES_PER_PIXEL, &[self.bands]));
        entries.push(Entry::shorts(TAG_PLANAR_CONFIGURATION, &[1]));
        entries.push(Entry::shorts(TAG_SAMPLE_FORMAT, &vec![3; bands]));

        match self.tile {
            Some((tile_width, tile_height)) => {
                entries.push(Entry::longs(TAG_TILE_WIDTH, &[tile_width]));
                entries.push(Entry::longs(TAG_TILE_LENGTH, &[tile_height]));
                entries.push(Entry::longs(TAG_TILE_OFFSETS, block_offsets));
                entries.push(Entry::longs(TAG_TILE_BYTE_COUNTS, &byte_counts));
            }
            None => {
                entries.push(Entry::longs(TAG_STRIP_OFFSETS, block_offsets));
                entries.push(Entry::longs(TAG_ROWS_PER_STRIP, &[self.rows_for(image)]));
                entries.push(Entry::longs(TAG_STRIP_BYTE_COUNTS, &byte_counts));
            }
        }

        if is_main {
            if let Some(scale) = self.pixel_scale {
                entries.push(Entry::doubles(TAG_MODEL_PIXEL_SCALE, &scale));
            }
            if let Some(tiepoint) = self.tiepoint {
                entries.push(Entry::doubles(TAG_MODEL_TIEPOINT, &tiepoint));
            }
            if let Some(matrix) = self.transformation {
                entries.push(Entry::doubles(TAG_MODEL_TRANSFORMATION, &matrix));
            }
            if !self.geokeys.is_empty() {
                let mut keys = self.geokeys.clone();
                keys.sort_by_key(|(key, _)| *key);
                let mut directory = vec![1, 1, 0, keys.len() as u16];
                for (key, value) in keys {
                    directory.extend_from_slice(&[key, 0, 1, value]);
                }
                entries.push(Entry::shorts(TAG_GEO_KEY_DIRECTORY, &directory));
            }
            if let Some(nodata) = &self.nodata {
                entries.push(Entry::ascii(TAG_GDAL_NODATA, nodata));
            }
        }

        entries.sort_by_key(|entry| entry.tag);
        entries
    }
}

fn default_samples(width: u32, height: u32, bands: u16) -> Vec<f32> {
    let mut samples = Vec::with_capacity(width as usize * height as usize * bands as usize);
    for row in 0..height {
        for column in 0..width {
            for band in 0..bands {
                samples.push((u32::from(band) * 10_000 + row * width + column) as f32);
            }
        }
    }
    samples
}

fn ifd_region_len(entries: &[Entry]) -> usize {
    2 + entries.len() * 12 + 4 + entries.iter().map(Entry::out_of_line_len).sum::<usize>()
}

fn encode_ifd(entries: &[Entry], ifd_start: usize, next_ifd: u32) -> Vec<u8> {
    let mut directory = Vec::with_capacity(2 + entries.len() * 12 + 4);
    let mut values = Vec::new();
    let values_start = ifd_start + 2 + entries.len() * 12 + 4;

    directory.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for entry in entries {
        directory.extend_from_slice(&entry.tag.to_le_bytes());
        directory.extend_from_slice(&entry.field_type.to_le_bytes());
        directory.extend_from_slice(&entry.count.to_le_bytes());
        if entry.data.len() <= 4 {
            let mut inline = entry.data.clone();
            inline.resize(4, 0);
            directory.extend_from_slice(&inline);
        } else {
            directory.extend_from_slice(&((values_start + values.len()) as u32).to_le_bytes());
            values.extend_from_slice(&entry.data);
            if entry.data.len() % 2 == 1 {
                values.push(0);
            }
        }
    }
    directory.extend_from_slice(&next_ifd.to_le_bytes());
    directory.extend(values);
    directory
}

/// What the scripted service does for one set of requested variables.
#[derive(Debug, Clone)]
pub struct ScriptedJob {
    states: Vec<JobState>,
    message: String,
    outputs: Vec<(String, Vec<u8>)>,
    rejection: Option<(u16, String)>,
}

impl ScriptedJob {
    /// Walks `states` one poll at a time; the last state repeats.
    #[must_use]
    pub fn with_states(states: &[JobState]) -> Self {
        Self {
            states: states.to_vec(),
            message: String::new(),
            outputs: Vec::new(),
            rejection: None,
        }
    }

    #[must_use]
    pub fn succeeding() -> Self {
        Self::with_states(&[JobState::Accepted, JobState::Running, JobState::Successful])
            .message("The job has completed successfully")
    }

    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self::with_states(&[JobState::Accepted, JobState::Failed]).message(message)
    }

    /// Refuses the submission itself with an HTTP error.
    #[must_use]
    pub fn rejected_on_submit(status: u16, description: &str) -> Self {
        let mut job = Self::with_states(&[JobState::Failed]);
        job.rejection = Some((status, description.to_string()));
        job
    }

    #[must_use]
    pub fn message(mut self, message: &str) -> Self {
        self.message = message.to_string();
        self
    }

    #[must_use]
    pub fn output(mut self, file_name: &str, bytes: Vec<u8>) -> Self {
        self.outputs.push((file_name.to_string(), bytes));
        self
    }
}

/// In-memory `ConversionService` keyed by the comma-joined variable list.
#[derive(Debug, Default)]
pub struct ScriptedService {
    scripts: HashMap<String, ScriptedJob>,
    jobs: RefCell<HashMap<String, (String, usize)>>,
    submissions: RefCell<Vec<ConversionRequest>>,
    status_calls: Cell<usize>,
    download_calls: Cell<usize>,
}

impl ScriptedService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_variables(mut self, variables: &[&str], job: ScriptedJob) -> Self {
        self.scripts.insert(variables.join(","), job);
        self
    }

    pub fn submissions(&self) -> Vec<ConversionRequest> {
        self.submissions.borrow().clone()
    }

    pub fn remote_calls(&self) -> usize {
        self.submissions.borrow().len() + self.status_calls.get() + self.download_calls.get()
    }

    fn job_status(&self, job_id: &str, key: &str, step: usize) -> JobStatus {
        let script = &self.scripts[key];
        let state = script
            .states
            .get(step)
            .or_else(|| script.states.last())
            .copied()
            .unwrap_or(JobState::Successful);
        let links = if state.is_success() {
            script
                .outputs
                .iter()
                .map(|(name, _)| JobLink {
                    href: format!("https://scripted.test/outputs/{}/{}", job_id, name),
                    rel: Some("data".to_string()),
                    title: Some(name.clone()),
                    media_type: Some("image/tiff".to_string()),
                })
                .collect()
        } else {
            Vec::new()
        };

        JobStatus {
            job_id: JobId(job_id.to_string()),
            state,
            message: script.message.clone(),
            progress: if state.is_terminal() { 100 } else { 0 },
            links,
        }
    }
}

impl ConversionService for ScriptedService {
    fn submit(&self, request: &ConversionRequest) -> Result<JobStatus, ServiceError> {
        self.submissions.borrow_mut().push(request.clone());
        let key = request.variables.join(",");
        let script = self
            .scripts
            .get(&key)
            .ok_or_else(|| ServiceError::Protocol(format!("no script for variables '{}'", key)))?;
        if let Some((status, description)) = &script.rejection {
            return Err(ServiceError::Rejected {
                url: format!("https://scripted.test/{}", key),
                status: *status,
                description: description.clone(),
            });
        }

        let job_id = format!("job-{}", self.submissions.borrow().len());
        self.jobs
            .borrow_mut()
            .insert(job_id.clone(), (key.clone(), 0));
        Ok(self.job_status(&job_id, &key, 0))
    }

    fn status(&self, job_id: &JobId) -> Result<JobStatus, ServiceError> {
        self.status_calls.set(self.status_calls.get() + 1);
        let mut jobs = self.jobs.borrow_mut();
        let (key, step) = jobs
            .get_mut(job_id.as_str())
            .ok_or_else(|| ServiceError::Protocol(format!("unknown job '{}'", job_id)))?;
        *step += 1;
        Ok(self.job_status(job_id.as_str(), key, *step))
    }

    fn download_results(
        &self,
        job: &JobStatus,
        destination: &Path,
    ) -> Result<Vec<PathBuf>, ServiceError> {
        self.download_calls.set(self.download_calls.get() + 1);
        let jobs = self.jobs.borrow();
        let (key, _) = jobs
            .get(job.job_id.as_str())
            .ok_or_else(|| ServiceError::Protocol(format!("unknown job '{}'", job.job_id)))?;

        let mut written = Vec::new();
        for (name, bytes) in &self.scripts[key].outputs {
            let path = destination.join(name);
            fs::write(&path, bytes).map_err(|source| ServiceError::Write {
                path: path.clone(),
                source,
            })?;
            written.push(path);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::GeoTiffBuilder;

    #[test]
    fn header_points_at_first_ifd() {
        let bytes = GeoTiffBuilder::new(4, 4).build();
        assert_eq!(&bytes[0..4], b"II\x2a\x00");
        assert_eq!(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), 8);
    }

    #[test]
    fn ifds_after_data_moves_first_ifd_offset() {
        let bytes = GeoTiffBuilder::new(16, 16).ifds_after_data().build();
        let offset = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        assert_eq!(offset as usize, 8 + 16 * 16 * 4);
    }

    #[test]
    fn tiled_blocks_are_padded_to_full_tiles() {
        let stripped = GeoTiffBuilder::new(20, 20).build();
        let tiled = GeoTiffBuilder::new(20, 20).tiled(16, 16).build();
        assert!(tiled.len() - stripped.len() >= (4 * 16 * 16 - 20 * 20) * 4);
    }
}
