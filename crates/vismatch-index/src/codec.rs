//! Vector codec: the on-disk index pair.
//!
//! Both files are NPY arrays (NumPy's `.npy` format) so an index can be
//! inspected with `numpy.load`:
//! - vectors: `'<f4'`, C order, shape `(N, D)`
//! - ids: `'<i8'`, shape `(N,)`
//!
//! On unix every write lands in a fresh generation directory next to the
//! configured paths:
//!
//! ```text
//! index/
//!   .current -> .gen-Ab12Cd
//!   .gen-Ab12Cd/product_embeddings.npy
//!   .gen-Ab12Cd/product_ids.npy
//!   product_embeddings.npy -> .current/product_embeddings.npy
//!   product_ids.npy -> .current/product_ids.npy
//! ```
//!
//! Publishing renames a new `.current` link over the old one, which switches
//! both files in one step. Readers pin both paths to the same generation
//! before reading, so an id file is never paired with another write's
//! vectors. The generation before the current one is kept for readers that
//! resolved it just before the switch; older ones are pruned.

use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use vismatch_types::{CatalogItemId, FeatureVector};

use crate::error::IndexError;

const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Data offset alignment required by the NPY format
const HEADER_ALIGN: usize = 64;

/// Link naming the generation directory being served.
#[cfg(unix)]
const CURRENT_LINK: &str = ".current";

#[cfg(unix)]
const GENERATION_PREFIX: &str = ".gen-";

/// Reads retried when a publish lands between resolving the two files.
const PIN_ATTEMPTS: usize = 16;

/// Paths of the vectors/ids pair, always handled together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFiles {
    pub vectors: PathBuf,
    pub ids: PathBuf,
}

impl IndexFiles {
    pub fn new(vectors: impl Into<PathBuf>, ids: impl Into<PathBuf>) -> Self {
        Self {
            vectors: vectors.into(),
            ids: ids.into(),
        }
    }

    /// Pair using the default file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(
            dir.join("product_embeddings.npy"),
            dir.join("product_ids.npy"),
        )
    }

    /// The first file of the pair that is absent, if any.
    pub fn first_missing(&self) -> Option<&Path> {
        [&self.vectors, &self.ids]
            .into_iter()
            .find(|p| !p.exists())
            .map(PathBuf::as_path)
    }
}

/// Decoded contents of an index pair.
#[derive(Debug, Clone)]
pub(crate) struct IndexArrays {
    pub vectors: Vec<FeatureVector>,
    pub ids: Vec<CatalogItemId>,
    pub dimension: usize,
}

/// Persist `vectors` and `ids` as an index pair.
///
/// Fails with `InvalidInput` (without touching the destination) when the
/// sequences differ in length or the vectors differ in dimensionality.
pub fn write(
    vectors_path: &Path,
    ids_path: &Path,
    vectors: &[FeatureVector],
    ids: &[CatalogItemId],
) -> Result<(), IndexError> {
    let dimension = vectors.first().map(FeatureVector::dimension).unwrap_or(0);
    write_pair(&IndexFiles::new(vectors_path, ids_path), vectors, ids, dimension)
}

/// Like [`write`], recording `dimension` in the header even when there are
/// no vectors.
pub(crate) fn write_pair(
    files: &IndexFiles,
    vectors: &[FeatureVector],
    ids: &[CatalogItemId],
    dimension: usize,
) -> Result<(), IndexError> {
    if vectors.len() != ids.len() {
        return Err(IndexError::InvalidInput(format!(
            "{} vectors but {} ids",
            vectors.len(),
            ids.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.dimension() != dimension) {
        return Err(IndexError::DimensionMismatch {
            expected: dimension,
            actual: bad.dimension(),
        });
    }
    let layout = PairLayout::of(files)?;

    let vectors_bytes = encode_vectors(vectors, dimension);
    let ids_bytes = encode_ids(ids);
    publish_pair(&layout, &vectors_bytes, &ids_bytes)?;

    info!(
        vectors = ?files.vectors,
        ids = ?files.ids,
        count = ids.len(),
        dim = dimension,
        "Published index pair"
    );
    Ok(())
}

/// Read an index pair written by [`write`].
pub fn read(
    vectors_path: &Path,
    ids_path: &Path,
) -> Result<(Vec<FeatureVector>, Vec<CatalogItemId>), IndexError> {
    let arrays = read_arrays(&IndexFiles::new(vectors_path, ids_path))?;
    Ok((arrays.vectors, arrays.ids))
}

pub(crate) fn read_arrays(files: &IndexFiles) -> Result<IndexArrays, IndexError> {
    for attempt in 1..=PIN_ATTEMPTS {
        if let Some(missing) = files.first_missing() {
            return Err(IndexError::Missing(missing.to_path_buf()));
        }
        match read_pinned(files)? {
            Some((vectors_raw, ids_raw)) => return decode_pair(files, &vectors_raw, &ids_raw),
            None => debug!(attempt, "Index republished while reading; retrying"),
        }
    }
    Err(IndexError::corrupt(
        &files.vectors,
        format!("index was republished during {PIN_ATTEMPTS} consecutive reads"),
    ))
}

/// Bytes of both files taken from one published generation, or `None` when
/// a publish raced the read.
///
/// The vectors path is resolved before and after the ids path; if both
/// resolve the same no switch happened in between, and generation
/// directories are never reused.
fn read_pinned(files: &IndexFiles) -> Result<Option<(Vec<u8>, Vec<u8>)>, IndexError> {
    let Some(vectors) = resolve(&files.vectors)? else {
        return Ok(None);
    };
    let Some(ids) = resolve(&files.ids)? else {
        return Ok(None);
    };
    if resolve(&files.vectors)?.as_ref() != Some(&vectors) {
        return Ok(None);
    }

    let Some(vectors_raw) = read_if_present(&vectors)? else {
        return Ok(None);
    };
    let Some(ids_raw) = read_if_present(&ids)? else {
        return Ok(None);
    };
    Ok(Some((vectors_raw, ids_raw)))
}

fn resolve(path: &Path) -> Result<Option<PathBuf>, IndexError> {
    match fs::canonicalize(path) {
        Ok(resolved) => Ok(Some(resolved)),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
        Err(e) => Err(IndexError::Io(e)),
    }
}

fn read_if_present(path: &Path) -> Result<Option<Vec<u8>>, IndexError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
        Err(e) => Err(IndexError::Io(e)),
    }
}

fn decode_pair(
    files: &IndexFiles,
    vectors_raw: &[u8],
    ids_raw: &[u8],
) -> Result<IndexArrays, IndexError> {
    let (vectors, dimension) = decode_vectors(&files.vectors, vectors_raw)?;
    let ids = decode_ids(&files.ids, ids_raw)?;

    if vectors.len() != ids.len() {
        return Err(IndexError::corrupt(
            &files.vectors,
            format!(
                "{} vectors but {} ids in {}",
                vectors.len(),
                ids.len(),
                files.ids.display()
            ),
        ));
    }

    debug!(count = ids.len(), dim = dimension, "Decoded index pair");
    Ok(IndexArrays {
        vectors,
        ids,
        dimension,
    })
}

// ===== Publishing =====

/// Directory and file names of a pair; both files must share a directory.
#[derive(Debug)]
struct PairLayout {
    dir: PathBuf,
    vectors_name: OsString,
    ids_name: OsString,
}

impl PairLayout {
    fn of(files: &IndexFiles) -> Result<Self, IndexError> {
        let dir = parent_dir(&files.vectors);
        if parent_dir(&files.ids) != dir {
            return Err(IndexError::InvalidInput(format!(
                "{} and {} must be in the same directory",
                files.vectors.display(),
                files.ids.display()
            )));
        }
        let vectors_name = file_name(&files.vectors)?;
        let ids_name = file_name(&files.ids)?;
        if vectors_name == ids_name {
            return Err(IndexError::InvalidInput(format!(
                "vectors and ids both point at {}",
                files.vectors.display()
            )));
        }
        Ok(Self {
            dir,
            vectors_name,
            ids_name,
        })
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn file_name(path: &Path) -> Result<OsString, IndexError> {
    path.file_name()
        .map(ToOwned::to_owned)
        .ok_or_else(|| IndexError::InvalidInput(format!("{} has no file name", path.display())))
}

#[cfg(unix)]
fn publish_pair(
    layout: &PairLayout,
    vectors_bytes: &[u8],
    ids_bytes: &[u8],
) -> Result<(), IndexError> {
    let dir = &layout.dir;
    fs::create_dir_all(dir)?;

    let staged = tempfile::Builder::new()
        .prefix(GENERATION_PREFIX)
        .tempdir_in(dir)?;
    write_synced(&staged.path().join(&layout.vectors_name), vectors_bytes)?;
    write_synced(&staged.path().join(&layout.ids_name), ids_bytes)?;
    sync_dir(staged.path());
    let generation = file_name(&staged.keep())?;

    let previous = fs::read_link(dir.join(CURRENT_LINK))
        .ok()
        .and_then(|target| target.file_name().map(ToOwned::to_owned));
    replace_with_link(dir, Path::new(CURRENT_LINK), Path::new(&generation))?;

    for name in [&layout.vectors_name, &layout.ids_name] {
        let target = Path::new(CURRENT_LINK).join(name);
        if fs::read_link(dir.join(name)).ok().as_deref() != Some(target.as_path()) {
            replace_with_link(dir, Path::new(name), &target)?;
        }
    }
    sync_dir(dir);

    let keep: Vec<OsString> = std::iter::once(generation).chain(previous).collect();
    prune_generations(dir, &keep);
    Ok(())
}

/// Atomically point `dir/name` at `target`, replacing whatever is there.
#[cfg(unix)]
fn replace_with_link(dir: &Path, name: &Path, target: &Path) -> Result<(), IndexError> {
    let staged = tempfile::Builder::new()
        .prefix(".link-")
        .make_in(dir, |path| std::os::unix::fs::symlink(target, path))?;
    staged
        .persist(dir.join(name))
        .map_err(|e| IndexError::Io(e.error))?;
    Ok(())
}

#[cfg(unix)]
fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    use std::io::Write;

    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(unix)]
fn prune_generations(dir: &Path, keep: &[OsString]) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(GENERATION_PREFIX) || keep.contains(&name) {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => debug!(generation = ?name, "Pruned index generation"),
            Err(e) => {
                tracing::warn!(generation = ?name, error = %e, "Failed to prune index generation")
            }
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}

/// Without symlinks each file is renamed into place on its own, ids first.
#[cfg(not(unix))]
fn publish_pair(
    layout: &PairLayout,
    vectors_bytes: &[u8],
    ids_bytes: &[u8],
) -> Result<(), IndexError> {
    fs::create_dir_all(&layout.dir)?;
    let staged_vectors = stage(&layout.dir, vectors_bytes)?;
    let staged_ids = stage(&layout.dir, ids_bytes)?;

    staged_ids
        .persist(layout.dir.join(&layout.ids_name))
        .map_err(|e| IndexError::Io(e.error))?;
    staged_vectors
        .persist(layout.dir.join(&layout.vectors_name))
        .map_err(|e| IndexError::Io(e.error))?;
    Ok(())
}

#[cfg(not(unix))]
fn stage(dir: &Path, bytes: &[u8]) -> Result<tempfile::NamedTempFile, IndexError> {
    use std::io::Write;

    let mut file = tempfile::Builder::new()
        .prefix(".vismatch-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    Ok(file)
}

// ===== NPY encoding =====

fn encode_vectors(vectors: &[FeatureVector], dimension: usize) -> Vec<u8> {
    let mut out = npy_header("<f4", &format!("({}, {})", vectors.len(), dimension));
    out.reserve(vectors.len() * dimension * 4);
    for v in vectors {
        for x in v.as_slice() {
            out.extend_from_slice(&x.to_le_bytes());
        }
    }
    out
}

fn encode_ids(ids: &[CatalogItemId]) -> Vec<u8> {
    let mut out = npy_header("<i8", &format!("({},)", ids.len()));
    out.reserve(ids.len() * 8);
    for id in ids {
        out.extend_from_slice(&id.get().to_le_bytes());
    }
    out
}

/// Version 1.0 header, padded so the payload starts on a 64-byte boundary.
fn npy_header(descr: &str, shape: &str) -> Vec<u8> {
    let dict = format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': {shape}, }}");
    // magic + version + u16 length + dict + '\n'
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    let header_len = dict.len() + padding + 1;

    let mut out = Vec::with_capacity(unpadded + padding);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header_len as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.extend(std::iter::repeat_n(b' ', padding));
    out.push(b'\n');
    out
}

// ===== NPY decoding =====

#[derive(Debug, PartialEq)]
struct NpyHeader {
    descr: String,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Split a raw NPY file into its parsed header and payload.
fn split_npy<'a>(path: &Path, raw: &'a [u8]) -> Result<(NpyHeader, &'a [u8]), IndexError> {
    if raw.len() < 10 || &raw[..6] != MAGIC {
        return Err(IndexError::corrupt(path, "not an NPY file (bad magic)"));
    }
    let major = raw[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([raw[8], raw[9]]) as usize, 10),
        2 | 3 => {
            if raw.len() < 12 {
                return Err(IndexError::corrupt(path, "truncated header"));
            }
            (
                u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]) as usize,
                12,
            )
        }
        v => {
            return Err(IndexError::corrupt(
                path,
                format!("unsupported NPY version {v}"),
            ))
        }
    };
    let header_end = header_start + header_len;
    if raw.len() < header_end {
        return Err(IndexError::corrupt(path, "truncated header"));
    }
    let text = std::str::from_utf8(&raw[header_start..header_end])
        .map_err(|_| IndexError::corrupt(path, "header is not valid text"))?;
    let header = parse_header(text).map_err(|reason| IndexError::corrupt(path, reason))?;
    Ok((header, &raw[header_end..]))
}

fn parse_header(text: &str) -> Result<NpyHeader, String> {
    let descr = value_after_key(text, "descr")?;
    let descr = descr
        .strip_prefix(['\'', '"'])
        .and_then(|rest| rest.find(['\'', '"']).map(|end| rest[..end].to_string()))
        .ok_or_else(|| "malformed 'descr'".to_string())?;

    let fortran = value_after_key(text, "fortran_order")?;
    let fortran_order = if fortran.starts_with("True") {
        true
    } else if fortran.starts_with("False") {
        false
    } else {
        return Err("malformed 'fortran_order'".to_string());
    };

    let shape_src = value_after_key(text, "shape")?;
    let inner = shape_src
        .strip_prefix('(')
        .and_then(|rest| rest.find(')').map(|end| &rest[..end]))
        .ok_or_else(|| "malformed 'shape'".to_string())?;
    let shape = inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| format!("bad shape component {s:?}"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NpyHeader {
        descr,
        fortran_order,
        shape,
    })
}

/// Text following `'key':` with leading whitespace removed.
fn value_after_key<'a>(text: &'a str, key: &str) -> Result<&'a str, String> {
    for quote in ['\'', '"'] {
        let needle = format!("{quote}{key}{quote}");
        if let Some(pos) = text.find(&needle) {
            let rest = text[pos + needle.len()..].trim_start();
            let rest = rest
                .strip_prefix(':')
                .ok_or_else(|| format!("missing ':' after '{key}'"))?;
            return Ok(rest.trim_start());
        }
    }
    Err(format!("header has no '{key}' entry"))
}

fn check_payload(path: &Path, payload: &[u8], elements: usize, item: usize) -> Result<(), IndexError> {
    let expected = elements
        .checked_mul(item)
        .ok_or_else(|| IndexError::corrupt(path, "shape overflows"))?;
    if payload.len() != expected {
        return Err(IndexError::corrupt(
            path,
            format!("expected {expected} payload bytes, found {}", payload.len()),
        ));
    }
    Ok(())
}

fn decode_vectors(path: &Path, raw: &[u8]) -> Result<(Vec<FeatureVector>, usize), IndexError> {
    let (header, payload) = split_npy(path, raw)?;
    if header.fortran_order {
        return Err(IndexError::corrupt(path, "Fortran-order arrays are not supported"));
    }
    let (rows, dimension) = match header.shape.as_slice() {
        [rows, dim] => (*rows, *dim),
        other => {
            return Err(IndexError::corrupt(
                path,
                format!("vectors must be 2-dimensional, shape is {other:?}"),
            ))
        }
    };
    if dimension == 0 && rows > 0 {
        return Err(IndexError::corrupt(
            path,
            format!("{rows} vectors with no components"),
        ));
    }
    let elements = rows
        .checked_mul(dimension)
        .ok_or_else(|| IndexError::corrupt(path, "shape overflows"))?;

    let flat: Vec<f32> = match header.descr.as_str() {
        "<f4" => {
            check_payload(path, payload, elements, 4)?;
            payload
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        }
        "<f8" => {
            check_payload(path, payload, elements, 8)?;
            payload
                .chunks_exact(8)
                .map(|c| {
                    f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32
                })
                .collect()
        }
        other => {
            return Err(IndexError::corrupt(
                path,
                format!("unsupported vector dtype {other:?}"),
            ))
        }
    };

    let vectors = if dimension == 0 {
        Vec::new()
    } else {
        flat.chunks_exact(dimension)
            .map(|row| FeatureVector::new(row.to_vec()))
            .collect()
    };
    Ok((vectors, dimension))
}

fn decode_ids(path: &Path, raw: &[u8]) -> Result<Vec<CatalogItemId>, IndexError> {
    let (header, payload) = split_npy(path, raw)?;
    let len = match header.shape.as_slice() {
        [len] => *len,
        other => {
            return Err(IndexError::corrupt(
                path,
                format!("ids must be 1-dimensional, shape is {other:?}"),
            ))
        }
    };

    match header.descr.as_str() {
        "<i8" => {
            check_payload(path, payload, len, 8)?;
            Ok(payload
                .chunks_exact(8)
                .map(|c| {
                    CatalogItemId::new(i64::from_le_bytes([
                        c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7],
                    ]))
                })
                .collect())
        }
        "<i4" => {
            check_payload(path, payload, len, 4)?;
            Ok(payload
                .chunks_exact(4)
                .map(|c| CatalogItemId::new(i64::from(i32::from_le_bytes([c[0], c[1], c[2], c[3]]))))
                .collect())
        }
        other => Err(IndexError::corrupt(
            path,
            format!("unsupported id dtype {other:?}"),
        )),
    }
}
