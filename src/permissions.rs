//! POSIX permission sets, octal masks and symbolic strings
//!
//! Only the nine owner/group/other read/write/execute bits are modelled.
//! Higher bits (setuid, setgid, sticky, file type) are ignored on input and
//! never produced.

use bitflags::bitflags;
use std::fmt;
use std::str::FromStr;

use crate::error::FsError;

/// The nine bits this codec understands
pub const PERMISSION_BITS: u32 = 0o777;

bitflags! {
    /// Set of POSIX permissions
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct PermissionSet: u32 {
        const OWNER_READ = 0o400;
        const OWNER_WRITE = 0o200;
        const OWNER_EXECUTE = 0o100;
        const GROUP_READ = 0o040;
        const GROUP_WRITE = 0o020;
        const GROUP_EXECUTE = 0o010;
        const OTHERS_READ = 0o004;
        const OTHERS_WRITE = 0o002;
        const OTHERS_EXECUTE = 0o001;
    }
}

/// Symbolic positions in display order
const SYMBOLIC_ORDER: [(PermissionSet, char); 9] = [
    (PermissionSet::OWNER_READ, 'r'),
    (PermissionSet::OWNER_WRITE, 'w'),
    (PermissionSet::OWNER_EXECUTE, 'x'),
    (PermissionSet::GROUP_READ, 'r'),
    (PermissionSet::GROUP_WRITE, 'w'),
    (PermissionSet::GROUP_EXECUTE, 'x'),
    (PermissionSet::OTHERS_READ, 'r'),
    (PermissionSet::OTHERS_WRITE, 'w'),
    (PermissionSet::OTHERS_EXECUTE, 'x'),
];

impl PermissionSet {
    /// Octal mask of this set
    pub fn to_mask(self) -> u32 {
        self.bits()
    }

    /// Set described by `mask`; bits above 0o777 are dropped
    pub fn from_mask(mask: u32) -> Self {
        Self::from_bits_truncate(mask & PERMISSION_BITS)
    }

    /// Ten-character form such as `-rwxr-x---`
    pub fn to_symbolic(self) -> String {
        let mut out = String::with_capacity(10);
        out.push('-');
        for (flag, letter) in SYMBOLIC_ORDER {
            out.push(if self.contains(flag) { letter } else { '-' });
        }
        out
    }

    /// Parse the nine-character `rwxr-x---` form, with or without the
    /// leading type character `-`
    pub fn from_symbolic(s: &str) -> crate::error::Result<Self> {
        let body = s.strip_prefix('-').filter(|rest| rest.len() == 9).unwrap_or(s);
        if body.len() != 9 || !body.is_ascii() {
            return Err(FsError::InvalidArgument(format!(
                "invalid permission string '{}'",
                s
            )));
        }

        let mut set = PermissionSet::empty();
        for ((flag, letter), c) in SYMBOLIC_ORDER.iter().zip(body.chars()) {
            if c == *letter {
                set |= *flag;
            } else if c != '-' {
                return Err(FsError::InvalidArgument(format!(
                    "invalid permission string '{}': unexpected '{}'",
                    s, c
                )));
            }
        }
        Ok(set)
    }
}

/// Octal mask of `set`
pub fn to_mask(set: PermissionSet) -> u32 {
    set.to_mask()
}

/// Set described by `mask`
pub fn from_mask(mask: u32) -> PermissionSet {
    PermissionSet::from_mask(mask)
}

/// Symbolic string for `mask`
pub fn to_symbolic_string(mask: u32) -> String {
    PermissionSet::from_mask(mask).to_symbolic()
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_symbolic())
    }
}

impl FromStr for PermissionSet {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_symbolic(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_round_trip_all_values() {
        for m in 0..=PERMISSION_BITS {
            assert_eq!(to_mask(from_mask(m)), m);
        }
    }

    #[test]
    fn test_symbolic_round_trip_all_values() {
        for m in 0..=PERMISSION_BITS {
            let s = to_symbolic_string(m);
            assert_eq!(s.len(), 10);
            assert!(s.starts_with('-'));
            for (i, c) in s.chars().skip(1).enumerate() {
                let bit = 1 << (8 - i);
                assert_eq!(c != '-', m & bit != 0, "mask {:o} position {}", m, i);
            }
            assert_eq!(PermissionSet::from_symbolic(&s).unwrap().to_mask(), m);
        }
    }

    #[test]
    fn test_known_strings() {
        assert_eq!(to_symbolic_string(0o755), "-rwxr-xr-x");
        assert_eq!(to_symbolic_string(0o640), "-rw-r-----");
        assert_eq!(to_symbolic_string(0), "----------");
        let set: PermissionSet = "rw-r--r--".parse().unwrap();
        assert_eq!(set.to_mask(), 0o644);
    }

    #[test]
    fn test_high_bits_ignored() {
        assert_eq!(from_mask(0o4755).to_mask(), 0o755);
        assert_eq!(from_mask(0o100644).to_mask(), 0o644);
        assert_eq!(to_symbolic_string(0o1777), "-rwxrwxrwx");
    }

    #[test]
    fn test_invalid_symbolic() {
        assert!(PermissionSet::from_symbolic("rwx").is_err());
        assert!(PermissionSet::from_symbolic("drwxr-xr-x").is_err());
        assert!(PermissionSet::from_symbolic("-rwsr-xr-x").is_err());
        assert!(PermissionSet::from_symbolic("-wrxr-xr-x").is_err());
    }

    #[test]
    fn test_display() {
        let set = PermissionSet::OWNER_READ | PermissionSet::OWNER_WRITE | PermissionSet::GROUP_READ;
        assert_eq!(set.to_string(), "-rw-r-----");
    }
}
