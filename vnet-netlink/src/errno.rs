use std::{fmt, io};

/// A positive errno value returned by the kernel in a netlink error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(i32);

impl Errno {
    pub const EPERM: Self = Self(1);
    pub const ENOENT: Self = Self(2);
    pub const EAGAIN: Self = Self(11);
    pub const ENOMEM: Self = Self(12);
    pub const EBUSY: Self = Self(16);
    pub const EEXIST: Self = Self(17);
    pub const ENODEV: Self = Self(19);
    pub const EINVAL: Self = Self(22);
    pub const EFBIG: Self = Self(27);
    pub const EOPNOTSUPP: Self = Self(95);
    pub const EAFNOSUPPORT: Self = Self(97);
    pub const ENOBUFS: Self = Self(105);

    /// Builds an errno from the code carried in an error message, which the kernel negates.
    pub const fn from_code(code: i32) -> Self {
        Self(code.saturating_abs())
    }

    #[inline]
    pub const fn raw(&self) -> i32 {
        self.0
    }

    /// Whether the kernel reported that the addressed object does not exist.
    pub fn is_not_found(&self) -> bool {
        *self == Self::ENOENT || *self == Self::ENODEV
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (errno {})", io::Error::from_raw_os_error(self.0), self.0)
    }
}

impl From<Errno> for io::Error {
    fn from(errno: Errno) -> Self {
        Self::from_raw_os_error(errno.0)
    }
}
