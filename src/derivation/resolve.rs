//! Turning a [`Derivation`] into a [`BasicDerivation`] once the outputs
//! of all its input derivations are known: realized paths are moved
//! into the input sources, placeholders are rewritten to those paths,
//! and deferred outputs get their final input-addressed paths.

use std::collections::BTreeMap;
use std::mem;

use log::{debug, warn};

use crate::error::Error;
use crate::store_api::Store;

use super::placeholder::downstream_placeholder;
use super::{
    hash_derivation_modulo, output_path_name, BasicDerivation, Derivation, DerivationOutput,
};

fn rewrite_strings(mut s: String, rewrites: &BTreeMap<String, String>) -> String {
    for (from, to) in rewrites.iter() {
        if s.contains(from) {
            s = s.replace(from, to);
        }
    }
    s
}

async fn rewrite_derivation<S>(
    store: &mut S,
    drv: &mut BasicDerivation,
    rewrites: &BTreeMap<String, String>,
) -> Result<(), Error>
where
    S: Store + Send,
{
    debug!("rewriting the derivation");
    for (from, to) in rewrites.iter() {
        debug!("rewriting {} as {}", from, to);
    }

    drv.builder = rewrite_strings(mem::take(&mut drv.builder), rewrites);
    for arg in drv.args.iter_mut() {
        *arg = rewrite_strings(mem::take(arg), rewrites);
    }

    let mut new_env = BTreeMap::new();
    for (key, value) in mem::take(&mut drv.env) {
        new_env.insert(
            rewrite_strings(key, rewrites),
            rewrite_strings(value, rewrites),
        );
    }
    drv.env = new_env;

    let hash_modulo = hash_derivation_modulo(store, &Derivation::from(drv.clone()), true).await?;
    let store_dir = store.store_dir();
    for (output_name, output) in drv.outputs.iter_mut() {
        if let DerivationOutput::Deferred = output {
            let h = hash_modulo.require_regular()?;
            let out_path =
                store_dir.make_output_path(output_name, h, &output_path_name(&drv.name, output_name))?;
            drv.env
                .insert(output_name.clone(), store_dir.print_path(&out_path));
            *output = DerivationOutput::InputAddressed(out_path);
        }
    }

    Ok(())
}

impl Derivation {
    /// Return the underlying basic derivation, but with input
    /// derivations emptied into input sources and every
    /// [`downstream_placeholder`] replaced by the realized path it
    /// stood for. Returns `Ok(None)` while some needed input output has
    /// not been realized yet. The original derivation is left
    /// untouched.
    pub async fn try_resolve<S>(&self, store: &mut S) -> Result<Option<BasicDerivation>, Error>
    where
        S: Store + Send,
    {
        let mut resolved = self.basic.clone();
        let mut input_rewrites = BTreeMap::new();

        for (input_drv, input_outputs) in self.input_drvs.iter() {
            let output_map = store.query_output_map(input_drv).await?;
            for output_name in input_outputs.iter() {
                let actual_path = match output_map.get(output_name) {
                    Some(Some(path)) => path.clone(),
                    _ => {
                        warn!(
                            "output {} of input {} missing, aborting the resolving",
                            output_name,
                            store.store_dir().display_path(input_drv)
                        );
                        return Ok(None);
                    }
                };
                input_rewrites.insert(
                    downstream_placeholder(input_drv, output_name),
                    store.store_dir().print_path(&actual_path),
                );
                resolved.input_srcs.insert(actual_path);
            }
        }

        rewrite_derivation(store, &mut resolved, &input_rewrites).await?;

        Ok(Some(resolved))
    }
}
