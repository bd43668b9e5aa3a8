//! Opaque stand-ins for store paths that are not known yet. A
//! placeholder is `/` followed by the base32 rendering of a SHA-256
//! digest over a tagged clear text, so it can never collide with a real
//! store path and is indistinguishable from random bytes.

use crate::hash::{self, Algorithm};
use crate::path::StorePath;

use super::output_path_name;

/// Placeholder a derivation embeds to refer to one of its own outputs
/// before the output path can be computed.
pub fn hash_placeholder(output_name: &str) -> String {
    format!(
        "/{:#}",
        hash::digest(Algorithm::SHA256, format!("nix-output:{}", output_name))
    )
}

/// Placeholder for an output of an input derivation whose path isn't
/// known yet because that input is content-addressed. Substituted with
/// the realized path during resolution.
pub fn downstream_placeholder(drv_path: &StorePath, output_name: &str) -> String {
    let drv_name = drv_path.name_from_drv();
    let clear_text = format!(
        "nix-upstream-output:{}:{}",
        drv_path.hash,
        output_path_name(&drv_name, output_name)
    );
    format!("/{:#}", hash::digest(Algorithm::SHA256, clear_text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::proptest::arb_drv_store_path;
    use crate::path::proptest::arb_output_name;
    use pretty_assertions::assert_eq;
    use ::proptest::prelude::*;

    #[test]
    fn test_hash_placeholder_shape() {
        let p = hash_placeholder("out");
        assert!(p.starts_with('/'));
        // "/" + base32 of a sha256 digest.
        assert_eq!(p.len(), 1 + Algorithm::SHA256.base32_len());
        // Deterministic.
        assert_eq!(p, hash_placeholder("out"));
    }

    #[test]
    fn test_placeholders_are_not_store_paths() {
        let p = hash_placeholder("out");
        let store_dir = crate::StoreDir::default();
        assert!(store_dir.parse_path(&p).is_err());
    }

    #[test]
    fn test_downstream_placeholder_shape() {
        let drv_path: StorePath = "x7fwirmcacmyq5z1csxs44ilmm6zs0iq-hello.drv".parse().unwrap();
        let p = downstream_placeholder(&drv_path, "out");
        assert!(p.starts_with('/'));
        assert_eq!(p.len(), 1 + Algorithm::SHA256.base32_len());
        assert_ne!(p, downstream_placeholder(&drv_path, "dev"));
        assert_ne!(p, hash_placeholder("out"));
    }

    proptest! {
        #[test]
        fn proptest_hash_placeholder_unique(a in arb_output_name(), b in arb_output_name()) {
            prop_assert_eq!(hash_placeholder(&a) == hash_placeholder(&b), a == b);
        }

        #[test]
        fn proptest_downstream_placeholder_unique(
            p1 in arb_drv_store_path(),
            p2 in arb_drv_store_path(),
            o1 in arb_output_name(),
            o2 in arb_output_name(),
        ) {
            prop_assert_eq!(
                downstream_placeholder(&p1, &o1) == downstream_placeholder(&p2, &o2),
                (&p1, &o1) == (&p2, &o2)
            );
        }
    }
}
