use std::ffi::{CStr, CString};
use anyhow::{bail, Context, Result};

/// A network interface selected for capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub index: u32,
    pub name: Option<String>,
}

fn index_to_name(index: u32) -> Option<String> {
    let mut buf = [0 as libc::c_char; libc::IF_NAMESIZE];
    let ptr = unsafe { libc::if_indextoname(index, buf.as_mut_ptr()) };
    if ptr.is_null() {
        return None;
    }
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Some(name.to_string_lossy().into_owned())
}

/// Look up an interface by name, or accept a numeric index as-is.
pub fn resolve(name_or_index: &str) -> Result<Interface> {
    if let Ok(index) = name_or_index.parse::<u32>() {
        if index == 0 {
            bail!("Interface index must be non-zero");
        }
        return Ok(Interface { index, name: index_to_name(index) });
    }

    let c_name = CString::new(name_or_index).with_context(|| format!("Invalid interface name {:?}", name_or_index))?;
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        bail!("Unknown interface {}", name_or_index);
    }
    Ok(Interface { index, name: Some(name_or_index.to_string()) })
}
