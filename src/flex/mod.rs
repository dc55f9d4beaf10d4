//! Dynamic fixed-point ("flex") quantization
//!
//! A flex tensor stores integers `q` standing for real values `q * scale`.
//! Each flex tensor has a shared [`FlexEntry`] holding its current scale and
//! the last observed `maxabs` of what kernels stored into it. Kernels never
//! change a scale: they read it once at bind time, clip what they store to
//! the entry's `[nclip, pclip]` range and report `maxabs`. Recalibration
//! from those reports is the job of a [`ScaleController`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::config::FlexConfig;
use crate::error::{FlexForgeError, ForgeResult};
use crate::tensor::DType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlexId(pub u32);

impl fmt::Display for FlexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flex{}", self.0)
    }
}

/// Storage type and clip bounds of a flex tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlexDType {
    pub storage: DType,
    pub pclip: i64,
    pub nclip: i64,
}

impl FlexDType {
    /// Signed clip range as wide as `storage`.
    pub fn new(storage: DType) -> ForgeResult<Self> {
        Self::with_bits(storage, storage.size() as u32 * 8)
    }

    /// Signed `bits`-wide range, `[-2^(bits-1), 2^(bits-1) - 1]`, narrowed
    /// to what `storage` can hold.
    pub fn with_bits(storage: DType, bits: u32) -> ForgeResult<Self> {
        if storage.is_float() {
            return Err(FlexForgeError::DTypeMismatch {
                expected: DType::I16,
                got: storage,
            });
        }
        if bits == 0 || bits > 63 {
            return Err(FlexForgeError::InvalidConfiguration(format!(
                "flex clip width must be 1..=63 bits, got {bits}"
            )));
        }
        let half = 1i64 << (bits - 1);
        let (lo, hi) = storage.bounds();
        Ok(Self {
            storage,
            pclip: (half - 1).min(hi as i64),
            nclip: (-half).max(lo as i64),
        })
    }

    pub fn clip(&self, value: i64) -> i64 {
        value.clamp(self.nclip, self.pclip)
    }

    /// `trunc(value / scale)` clipped to range. Also says whether clipping occurred.
    pub fn quantize(&self, value: f64, scale: f64) -> (i64, bool) {
        let raw = (value / scale).trunc();
        if raw.is_nan() {
            return (0, false);
        }
        if raw > self.pclip as f64 {
            (self.pclip, true)
        } else if raw < self.nclip as f64 {
            (self.nclip, true)
        } else {
            (raw as i64, false)
        }
    }
}

const NO_REPORT: i64 = -1;

/// Shared per-tensor flex state.
#[derive(Debug)]
pub struct FlexEntry {
    id: FlexId,
    dtype: FlexDType,
    scale: Mutex<f64>,
    maxabs: AtomicI64,
    reports: AtomicU64,
}

impl FlexEntry {
    pub fn new(id: FlexId, dtype: FlexDType, scale: f64) -> Self {
        Self {
            id,
            dtype,
            scale: Mutex::new(scale),
            maxabs: AtomicI64::new(NO_REPORT),
            reports: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> FlexId {
        self.id
    }

    pub fn dtype(&self) -> FlexDType {
        self.dtype
    }

    pub fn scale(&self) -> ForgeResult<f64> {
        Ok(*self.scale.lock()?)
    }

    pub fn set_scale(&self, scale: f64) -> ForgeResult<()> {
        *self.scale.lock()? = scale;
        Ok(())
    }

    /// Record the largest absolute stored integer of the latest write.
    pub fn report_maxabs(&self, maxabs: i64) {
        self.maxabs.store(maxabs, Ordering::Release);
        self.reports.fetch_add(1, Ordering::Relaxed);
    }

    /// Last reported `maxabs`, if any write has been reported.
    pub fn maxabs(&self) -> Option<i64> {
        match self.maxabs.load(Ordering::Acquire) {
            NO_REPORT => None,
            v => Some(v),
        }
    }

    pub fn report_count(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }

    /// Whether the last report hit the positive clip bound.
    pub fn overflowed(&self) -> bool {
        self.maxabs().map_or(false, |m| m >= self.dtype.pclip)
    }
}

/// Flex handling attached to a kernel whose output is a flex tensor.
#[derive(Debug, Clone)]
pub struct FlexCapability {
    entry: Arc<FlexEntry>,
    scale: Option<f64>,
}

impl FlexCapability {
    pub fn new(entry: Arc<FlexEntry>) -> Self {
        Self { entry, scale: None }
    }

    /// Snapshot the entry's current scale for subsequent executions.
    pub fn bind_scale(&mut self) -> ForgeResult<()> {
        self.scale = Some(self.entry.scale()?);
        Ok(())
    }

    pub fn scale(&self) -> ForgeResult<f64> {
        self.scale.ok_or(FlexForgeError::FlexScaleUnbound(self.entry.id))
    }

    pub fn entry(&self) -> &Arc<FlexEntry> {
        &self.entry
    }

    pub fn id(&self) -> FlexId {
        self.entry.id
    }

    pub fn dtype(&self) -> FlexDType {
        self.entry.dtype
    }
}

/// Registry of the flex entries of one runtime.
#[derive(Debug)]
pub struct FlexManager {
    config: FlexConfig,
    entries: Mutex<HashMap<FlexId, Arc<FlexEntry>>>,
}

impl FlexManager {
    pub fn new(config: FlexConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or replace) an entry.
    pub fn register(&self, id: FlexId, dtype: FlexDType, scale: f64) -> ForgeResult<Arc<FlexEntry>> {
        let entry = Arc::new(FlexEntry::new(id, dtype, scale));
        self.entries.lock()?.insert(id, Arc::clone(&entry));
        tracing::debug!(flex = %id, pclip = dtype.pclip, scale, "flex entry registered");
        Ok(entry)
    }

    pub fn entry(&self, id: FlexId) -> ForgeResult<Arc<FlexEntry>> {
        self.entries
            .lock()?
            .get(&id)
            .cloned()
            .ok_or(FlexForgeError::UnknownFlexId(id))
    }

    /// Existing entry, or a new one with the configured defaults for `storage`.
    pub fn entry_or_register(&self, id: FlexId, storage: DType) -> ForgeResult<Arc<FlexEntry>> {
        let mut entries = self.entries.lock()?;
        if let Some(entry) = entries.get(&id) {
            return Ok(Arc::clone(entry));
        }
        let entry = Arc::new(FlexEntry::new(
            id,
            FlexDType::new(storage)?,
            self.config.initial_scale,
        ));
        entries.insert(id, Arc::clone(&entry));
        tracing::debug!(flex = %id, %storage, "flex entry registered with defaults");
        Ok(entry)
    }

    /// Last reported `maxabs` per entry, ordered by id.
    pub fn reports(&self) -> ForgeResult<Vec<(FlexId, Option<i64>)>> {
        let entries = self.entries.lock()?;
        let mut reports: Vec<_> = entries.values().map(|e| (e.id, e.maxabs())).collect();
        reports.sort_by_key(|(id, _)| *id);
        Ok(reports)
    }

    pub fn entries(&self) -> ForgeResult<Vec<Arc<FlexEntry>>> {
        Ok(self.entries.lock()?.values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> &FlexConfig {
        &self.config
    }
}

/// Recalibrates scales from reported `maxabs`.
///
/// An entry that hit `pclip` grows its scale by `overflow_growth`. Otherwise
/// the scale is set so the observed `maxabs` lands at `headroom * pclip`.
/// Entries without a report, or whose report is zero, are left alone.
#[derive(Debug, Clone, Copy)]
pub struct ScaleController {
    pub headroom: f64,
    pub overflow_growth: f64,
}

impl ScaleController {
    pub fn new(config: &FlexConfig) -> Self {
        Self {
            headroom: config.headroom,
            overflow_growth: config.overflow_growth,
        }
    }

    /// Adjust one entry. Returns the new scale if it changed.
    pub fn adjust(&self, entry: &FlexEntry) -> ForgeResult<Option<f64>> {
        let maxabs = match entry.maxabs() {
            Some(m) if m > 0 => m,
            _ => return Ok(None),
        };
        let pclip = entry.dtype.pclip;
        let scale = entry.scale()?;

        let new_scale = if maxabs >= pclip {
            scale * self.overflow_growth
        } else {
            maxabs as f64 * scale / (pclip as f64 * self.headroom)
        };

        if new_scale == scale {
            return Ok(None);
        }
        tracing::debug!(flex = %entry.id, maxabs, old = scale, new = new_scale, "flex rescale");
        entry.set_scale(new_scale)?;
        Ok(Some(new_scale))
    }

    /// Adjust every entry of `manager`. Returns how many scales changed.
    pub fn adjust_all(&self, manager: &FlexManager) -> ForgeResult<usize> {
        let mut changed = 0;
        for entry in manager.entries()? {
            if self.adjust(&entry)?.is_some() {
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_bounds() {
        let d = FlexDType::with_bits(DType::I8, 8).unwrap();
        assert_eq!((d.pclip, d.nclip), (127, -128));
        let d = FlexDType::new(DType::I16).unwrap();
        assert_eq!((d.pclip, d.nclip), (32767, -32768));
    }

    #[test]
    fn test_clip_bounds_follow_storage() {
        let d = FlexDType::new(DType::U8).unwrap();
        assert_eq!((d.pclip, d.nclip), (127, 0));
        assert_eq!(d.quantize(-5.0, 1.0), (0, true));

        let d = FlexDType::with_bits(DType::I8, 16).unwrap();
        assert_eq!((d.pclip, d.nclip), (127, -128));
        assert_eq!(d.quantize(1000.0, 1.0), (127, true));
    }

    #[test]
    fn test_invalid_flex_dtypes() {
        assert!(matches!(
            FlexDType::new(DType::F64),
            Err(FlexForgeError::DTypeMismatch { got: DType::F64, .. })
        ));
        for bits in [0, 64, 65] {
            assert!(matches!(
                FlexDType::with_bits(DType::I32, bits),
                Err(FlexForgeError::InvalidConfiguration(_))
            ));
        }
        let d = FlexDType::with_bits(DType::I32, 63).unwrap();
        assert_eq!((d.pclip, d.nclip), (i32::MAX as i64, i32::MIN as i64));
    }

    #[test]
    fn test_quantize() {
        let d = FlexDType::with_bits(DType::I16, 8).unwrap();
        assert_eq!(d.quantize(300.0, 1.0), (127, true));
        assert_eq!(d.quantize(-300.0, 1.0), (-128, true));
        assert_eq!(d.quantize(10.9, 2.0), (5, false));
        assert_eq!(d.quantize(-10.9, 2.0), (-5, false));
    }

    #[test]
    fn test_capability_requires_bound_scale() {
        let entry = Arc::new(FlexEntry::new(FlexId(3), FlexDType::new(DType::I16).unwrap(), 0.5));
        let mut cap = FlexCapability::new(entry);
        assert!(matches!(
            cap.scale(),
            Err(FlexForgeError::FlexScaleUnbound(FlexId(3)))
        ));
        cap.bind_scale().unwrap();
        assert_eq!(cap.scale().unwrap(), 0.5);
    }

    #[test]
    fn test_manager() {
        let mgr = FlexManager::new(FlexConfig::default());
        assert!(matches!(
            mgr.entry(FlexId(0)),
            Err(FlexForgeError::UnknownFlexId(FlexId(0)))
        ));
        let a = mgr.entry_or_register(FlexId(0), DType::I16).unwrap();
        let b = mgr.entry_or_register(FlexId(0), DType::I16).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        a.report_maxabs(9);
        assert_eq!(mgr.reports().unwrap(), vec![(FlexId(0), Some(9))]);

        assert!(matches!(
            mgr.entry_or_register(FlexId(1), DType::F32),
            Err(FlexForgeError::DTypeMismatch { .. })
        ));
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn test_scale_controller() {
        let ctl = ScaleController {
            headroom: 0.5,
            overflow_growth: 2.0,
        };
        let entry = FlexEntry::new(FlexId(1), FlexDType::with_bits(DType::I16, 8).unwrap(), 1.0);

        // No report: unchanged
        assert_eq!(ctl.adjust(&entry).unwrap(), None);

        // Overflow doubles
        entry.report_maxabs(127);
        assert!(entry.overflowed());
        assert_eq!(ctl.adjust(&entry).unwrap(), Some(2.0));

        // maxabs lands at headroom * pclip = 63.5
        entry.report_maxabs(100);
        let s = ctl.adjust(&entry).unwrap().unwrap();
        assert!((s - 100.0 * 2.0 / 63.5).abs() < 1e-12);

        entry.report_maxabs(0);
        assert_eq!(ctl.adjust(&entry).unwrap(), None);
    }
}
