//! Automation strings and variants.
//!
//! `BSTR` and `VARIANT` are allocated on one side of the plugin boundary and
//! freed on the other, so both sides must agree on the allocator.  On Windows
//! that is `oleaut32`.  Everywhere else a portable implementation with the
//! same memory layout is used: a `BSTR` is a `malloc` block holding a 32-bit
//! byte length followed by the UTF-16 units and a terminating NUL, and the
//! pointer handed out addresses the first unit.

use std::ffi::c_void;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};

use crate::com::HResult;

/// A `BSTR` as it appears in vtable signatures.
pub type RawBstr = *mut u16;

// ── VARTYPE ───────────────────────────────────────────────────────────────────

pub const VT_EMPTY: u16 = 0;
pub const VT_NULL: u16 = 1;
pub const VT_I2: u16 = 2;
pub const VT_I4: u16 = 3;
pub const VT_R4: u16 = 4;
pub const VT_R8: u16 = 5;
pub const VT_BSTR: u16 = 8;
pub const VT_DISPATCH: u16 = 9;
pub const VT_ERROR: u16 = 10;
pub const VT_BOOL: u16 = 11;
pub const VT_VARIANT: u16 = 12;
pub const VT_UNKNOWN: u16 = 13;
pub const VT_I1: u16 = 16;
pub const VT_UI1: u16 = 17;
pub const VT_UI2: u16 = 18;
pub const VT_UI4: u16 = 19;
pub const VT_I8: u16 = 20;
pub const VT_UI8: u16 = 21;
pub const VT_INT: u16 = 22;
pub const VT_UINT: u16 = 23;
pub const VT_BYREF: u16 = 0x4000;

pub const VARIANT_TRUE: i16 = -1;
pub const VARIANT_FALSE: i16 = 0;

// ── Bstr ──────────────────────────────────────────────────────────────────────

/// An owned, non-null `BSTR`.
pub struct Bstr(NonNull<u16>);

impl Bstr {
    /// Allocate a copy of `units`.  `None` if the allocator refuses.
    pub fn from_wide(units: &[u16]) -> Option<Bstr> {
        NonNull::new(unsafe { sys::alloc_string(units) }).map(Bstr)
    }

    pub fn new(text: &str) -> Option<Bstr> {
        let units: Vec<u16> = text.encode_utf16().collect();
        Self::from_wide(&units)
    }

    /// Take ownership of a raw `BSTR`.
    ///
    /// # Safety
    ///
    /// `raw` must be null or a string from this module's allocator that no
    /// one else will free.
    pub unsafe fn from_raw(raw: RawBstr) -> Option<Bstr> {
        NonNull::new(raw).map(Bstr)
    }

    pub fn as_raw(&self) -> RawBstr {
        self.0.as_ptr()
    }

    pub fn into_raw(self) -> RawBstr {
        let raw = self.0.as_ptr();
        std::mem::forget(self);
        raw
    }

    pub fn as_wide(&self) -> &[u16] {
        unsafe { bstr_units(self.0.as_ptr()) }
    }

    pub fn len(&self) -> usize {
        self.as_wide().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Bstr {
    fn drop(&mut self) {
        unsafe { sys::free_string(self.0.as_ptr()) };
    }
}

impl fmt::Display for Bstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf16_lossy(self.as_wide()))
    }
}

impl fmt::Debug for Bstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bstr({:?})", self.to_string())
    }
}

/// Free a raw `BSTR`; null is ignored.
///
/// # Safety
///
/// `raw` must be null or an unfreed string from this module's allocator.
pub unsafe fn free_bstr(raw: RawBstr) {
    sys::free_string(raw);
}

/// The units of a raw `BSTR` (null reads as empty).
///
/// # Safety
///
/// `raw` must be null or a live string from this module's allocator, and
/// must outlive the returned slice.
pub unsafe fn bstr_units<'a>(raw: RawBstr) -> &'a [u16] {
    if raw.is_null() {
        return &[];
    }
    std::slice::from_raw_parts(raw, sys::string_len(raw))
}

// ── Variant ───────────────────────────────────────────────────────────────────

/// The payload of a [`Variant`].  Sixteen bytes on 64-bit targets (the
/// record pair is the widest member), eight on 32-bit ones.
#[repr(C)]
#[derive(Clone, Copy)]
pub union VariantData {
    pub llval: i64,
    pub ullval: u64,
    pub lval: i32,
    pub ulval: u32,
    pub ival: i16,
    pub uival: u16,
    pub cval: i8,
    pub bval: u8,
    pub fltval: f32,
    pub dblval: f64,
    pub boolval: i16,
    pub scode: i32,
    pub bstrval: RawBstr,
    pub punkval: *mut c_void,
    pub pdispval: *mut c_void,
    pub byref: *mut c_void,
    pub record: [*mut c_void; 2],
}

/// An automation `VARIANT`.  An owned value is cleared on drop, which frees
/// a contained string and releases a contained object.
#[repr(C)]
pub struct Variant {
    pub vt: u16,
    pub reserved1: u16,
    pub reserved2: u16,
    pub reserved3: u16,
    pub data: VariantData,
}

impl Variant {
    pub const fn empty() -> Self {
        Self {
            vt: VT_EMPTY,
            reserved1: 0,
            reserved2: 0,
            reserved3: 0,
            data: VariantData { record: [ptr::null_mut(); 2] },
        }
    }

    fn with(vt: u16, data: VariantData) -> Self {
        Self { vt, reserved1: 0, reserved2: 0, reserved3: 0, data }
    }

    pub fn null() -> Self {
        Self::with(VT_NULL, VariantData { llval: 0 })
    }

    pub fn from_i32(value: i32) -> Self {
        Self::with(VT_I4, VariantData { lval: value })
    }

    pub fn from_f64(value: f64) -> Self {
        Self::with(VT_R8, VariantData { dblval: value })
    }

    pub fn from_bool(value: bool) -> Self {
        let flag = if value { VARIANT_TRUE } else { VARIANT_FALSE };
        Self::with(VT_BOOL, VariantData { boolval: flag })
    }

    pub fn from_bstr(value: Bstr) -> Self {
        Self::with(VT_BSTR, VariantData { bstrval: value.into_raw() })
    }

    /// A string variant, or `None` if the string cannot be allocated.
    pub fn from_str(value: &str) -> Option<Self> {
        Bstr::new(value).map(Self::from_bstr)
    }

    pub fn vt(&self) -> u16 {
        self.vt
    }

    pub fn is_empty_or_null(&self) -> bool {
        matches!(self.vt, VT_EMPTY | VT_NULL)
    }

    /// The contained 32-bit integer, if this is a `VT_I4`.
    pub fn as_i32(&self) -> Option<i32> {
        (self.vt == VT_I4).then(|| unsafe { self.data.lval })
    }

    /// The contained string, if this is a `VT_BSTR`.
    pub fn as_wide(&self) -> Option<&[u16]> {
        (self.vt == VT_BSTR).then(|| unsafe { bstr_units(self.data.bstrval) })
    }

    /// Free whatever the value owns and reset it to `VT_EMPTY`.
    pub fn clear(&mut self) {
        let hr = unsafe { sys::variant_clear(self) };
        if hr.is_err() {
            tracing::warn!(%hr, vt = self.vt, "VariantClear failed");
        }
        self.vt = VT_EMPTY;
    }

    /// Coerce a copy of this value to a string (`VariantChangeType` to
    /// `VT_BSTR`).  The value itself is left untouched.
    pub fn to_bstr(&self) -> Result<Bstr, HResult> {
        let raw = unsafe { sys::change_type_bstr(self) }?;
        unsafe { Bstr::from_raw(raw) }.ok_or(HResult::E_OUTOFMEMORY)
    }
}

impl Default for Variant {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for Variant {
    fn drop(&mut self) {
        if !self.is_empty_or_null() {
            self.clear();
        }
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vt {
            VT_I4 => write!(f, "Variant::I4({})", unsafe { self.data.lval }),
            VT_BSTR => write!(f, "Variant::Bstr({:?})", String::from_utf16_lossy(unsafe {
                bstr_units(self.data.bstrval)
            })),
            vt => write!(f, "Variant(vt={vt})"),
        }
    }
}

/// A shallow copy of the value a `VT_BYREF` variant points at.  The copy
/// borrows the referenced resources and must never be cleared.
#[cfg_attr(windows, allow(dead_code))]
unsafe fn deref_byref(v: &Variant) -> Option<ManuallyDrop<Variant>> {
    let base = v.vt & !VT_BYREF;
    let target = v.data.byref;
    if target.is_null() {
        return None;
    }
    let data = match base {
        VT_VARIANT => return deref_byref_variant(target.cast::<Variant>()),
        VT_I1 | VT_UI1 => VariantData { bval: *target.cast::<u8>() },
        VT_I2 | VT_UI2 | VT_BOOL => VariantData { ival: *target.cast::<i16>() },
        VT_I4 | VT_UI4 | VT_INT | VT_UINT | VT_ERROR => VariantData { lval: *target.cast::<i32>() },
        VT_R4 => VariantData { fltval: *target.cast::<f32>() },
        VT_I8 | VT_UI8 | VT_R8 => VariantData { llval: *target.cast::<i64>() },
        VT_BSTR => VariantData { bstrval: *target.cast::<RawBstr>() },
        VT_DISPATCH | VT_UNKNOWN => VariantData { punkval: *target.cast::<*mut c_void>() },
        _ => return None,
    };
    Some(ManuallyDrop::new(Variant::with(base, data)))
}

#[cfg_attr(windows, allow(dead_code))]
unsafe fn deref_byref_variant(inner: *const Variant) -> Option<ManuallyDrop<Variant>> {
    let inner = &*inner;
    if inner.vt & VT_BYREF != 0 {
        return deref_byref(inner);
    }
    Some(ManuallyDrop::new(Variant::with(inner.vt, inner.data)))
}

// ── Windows backend ───────────────────────────────────────────────────────────

#[cfg(windows)]
mod sys {
    use super::{RawBstr, Variant, VT_BSTR, VT_EMPTY};
    use crate::com::HResult;

    #[link(name = "oleaut32")]
    extern "system" {
        fn SysAllocStringLen(s: *const u16, len: u32) -> RawBstr;
        fn SysFreeString(s: RawBstr);
        fn SysStringLen(s: RawBstr) -> u32;
        fn VariantClear(v: *mut Variant) -> HResult;
        fn VariantCopyInd(dest: *mut Variant, src: *const Variant) -> HResult;
        fn VariantChangeType(dest: *mut Variant, src: *const Variant, flags: u16, vt: u16) -> HResult;
    }

    pub unsafe fn alloc_string(units: &[u16]) -> RawBstr {
        match u32::try_from(units.len()) {
            Ok(len) => SysAllocStringLen(units.as_ptr(), len),
            Err(_) => std::ptr::null_mut(),
        }
    }

    pub unsafe fn free_string(s: RawBstr) {
        SysFreeString(s);
    }

    pub unsafe fn string_len(s: RawBstr) -> usize {
        SysStringLen(s) as usize
    }

    pub unsafe fn variant_clear(v: *mut Variant) -> HResult {
        VariantClear(v)
    }

    pub unsafe fn change_type_bstr(v: &Variant) -> Result<RawBstr, HResult> {
        let mut tmp = Variant::empty();
        let slot: *mut Variant = &mut tmp;
        VariantCopyInd(slot, v).ok()?;
        VariantChangeType(slot, slot, 0, VT_BSTR).ok()?;
        let raw = tmp.data.bstrval;
        tmp.vt = VT_EMPTY;
        Ok(raw)
    }
}

// ── Portable backend ──────────────────────────────────────────────────────────

#[cfg(not(windows))]
mod sys {
    use std::ffi::c_void;
    use std::ptr;

    use super::*;
    use crate::activscp::DISPID_VALUE;
    use crate::com::{ComPtr, IUnknownVtbl};
    use crate::activscp::IDispatch;

    const PREFIX: usize = std::mem::size_of::<u32>();

    pub unsafe fn alloc_string(units: &[u16]) -> RawBstr {
        let bytes = units.len() * 2;
        let Ok(prefix) = u32::try_from(bytes) else {
            return ptr::null_mut();
        };
        let base = libc::malloc(PREFIX + bytes + 2).cast::<u8>();
        if base.is_null() {
            return ptr::null_mut();
        }
        base.cast::<u32>().write(prefix);
        let chars = base.add(PREFIX).cast::<u16>();
        ptr::copy_nonoverlapping(units.as_ptr(), chars, units.len());
        chars.add(units.len()).write(0);
        chars
    }

    pub unsafe fn free_string(s: RawBstr) {
        if !s.is_null() {
            libc::free(s.cast::<u8>().sub(PREFIX).cast::<c_void>());
        }
    }

    pub unsafe fn string_len(s: RawBstr) -> usize {
        if s.is_null() {
            return 0;
        }
        s.cast::<u8>().sub(PREFIX).cast::<u32>().read() as usize / 2
    }

    pub unsafe fn variant_clear(v: *mut Variant) -> HResult {
        let v = &mut *v;
        match v.vt {
            VT_BSTR => free_string(v.data.bstrval),
            VT_DISPATCH | VT_UNKNOWN => {
                let obj = v.data.punkval;
                if !obj.is_null() {
                    let vtbl = &**obj.cast::<*const IUnknownVtbl>();
                    (vtbl.release)(obj);
                }
            }
            _ => {}
        }
        v.vt = VT_EMPTY;
        v.data = VariantData { record: [ptr::null_mut(); 2] };
        HResult::S_OK
    }

    pub unsafe fn change_type_bstr(v: &Variant) -> Result<RawBstr, HResult> {
        if v.vt & VT_BYREF != 0 {
            let target = deref_byref(v).ok_or(HResult::DISP_E_TYPEMISMATCH)?;
            return change_type_bstr(&target);
        }
        let d = &v.data;
        let text = match v.vt {
            VT_EMPTY => String::new(),
            VT_I1 => d.cval.to_string(),
            VT_UI1 => d.bval.to_string(),
            VT_I2 => d.ival.to_string(),
            VT_UI2 => d.uival.to_string(),
            VT_I4 | VT_INT => d.lval.to_string(),
            VT_UI4 | VT_UINT => d.ulval.to_string(),
            VT_I8 => d.llval.to_string(),
            VT_UI8 => d.ullval.to_string(),
            VT_R4 => format_real(f64::from(d.fltval)),
            VT_R8 => format_real(d.dblval),
            VT_BOOL => (if d.boolval != VARIANT_FALSE { "True" } else { "False" }).to_owned(),
            VT_BSTR => {
                let raw = alloc_string(bstr_units(d.bstrval));
                return if raw.is_null() { Err(HResult::E_OUTOFMEMORY) } else { Ok(raw) };
            }
            VT_DISPATCH => return dispatch_default_value(d.pdispval),
            _ => return Err(HResult::DISP_E_TYPEMISMATCH),
        };
        let units: Vec<u16> = text.encode_utf16().collect();
        let raw = alloc_string(&units);
        if raw.is_null() {
            Err(HResult::E_OUTOFMEMORY)
        } else {
            Ok(raw)
        }
    }

    /// Objects coerce through their default (`DISPID_VALUE`) property.
    unsafe fn dispatch_default_value(obj: *mut c_void) -> Result<RawBstr, HResult> {
        if obj.is_null() {
            return Err(HResult::DISP_E_TYPEMISMATCH);
        }
        let vtbl = &**obj.cast::<*const IUnknownVtbl>();
        (vtbl.add_ref)(obj);
        let disp = ComPtr::from_raw(obj.cast::<IDispatch>()).ok_or(HResult::E_POINTER)?;
        let value = disp.property_get(DISPID_VALUE)?;
        change_type_bstr(&value)
    }

    /// Whole numbers print without a fraction; everything else uses the
    /// shortest round-trip form.
    fn format_real(x: f64) -> String {
        if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 {
            format!("{}", x as i64)
        } else {
            format!("{x}")
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
