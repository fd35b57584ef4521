use std::ffi::{CStr, CString, c_char};

/// Hand a string to the host. The host must give it back through
/// `FrpFreeString`.
pub fn into_c_string(text: String) -> *mut c_char {
    let text = if text.contains('\0') {
        text.replace('\0', "")
    } else {
        text
    };

    CString::new(text).unwrap_or_default().into_raw()
}

/// # Safety
/// `ptr` must be NULL or a valid NUL terminated string.
pub unsafe fn from_c_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }

    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// # Safety
/// `ptr` must be NULL or come from [`into_c_string`] and not be freed yet.
pub unsafe fn free_c_string(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }

    drop(unsafe { CString::from_raw(ptr) });
}

#[cfg(test)]
mod test {
    use super::{free_c_string, from_c_str, into_c_string};

    #[test]
    fn strings_cross_the_boundary() {
        let ptr = into_c_string("login to server success".to_string());
        assert_eq!(unsafe { from_c_str(ptr) }.as_deref(), Some("login to server success"));
        unsafe { free_c_string(ptr) };
    }

    #[test]
    fn interior_nul_bytes_are_dropped() {
        let ptr = into_c_string("a\0b\0".to_string());
        assert_eq!(unsafe { from_c_str(ptr) }.as_deref(), Some("ab"));
        unsafe { free_c_string(ptr) };
    }

    #[test]
    fn null_pointers_are_ignored() {
        assert_eq!(unsafe { from_c_str(std::ptr::null()) }, None);
        unsafe { free_c_string(std::ptr::null_mut()) };
    }
}
