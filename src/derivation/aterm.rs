//! The textual form derivations are persisted in: a `Derive(...)` term
//! with a fixed positional schema. The encoder emits a single canonical
//! form and the parser accepts exactly that form, so parsing and
//! encoding are inverses on every byte string either side accepts.

use std::collections::BTreeMap;

use crate::path::StorePathSet;
use crate::store_dir::StoreDir;
use crate::StringSet;

use super::{
    output_path_name, validate_path, Derivation, DerivationInputs, DerivationOutput,
    DerivationOutputs, ParseDerivationError, ParseStorePathError,
};

fn print_string(res: &mut String, s: &str) {
    res.push('"');
    for c in s.chars() {
        match c {
            '"' | '\\' => {
                res.push('\\');
                res.push(c);
            }
            '\n' => res.push_str("\\n"),
            '\r' => res.push_str("\\r"),
            '\t' => res.push_str("\\t"),
            c => res.push(c),
        }
    }
    res.push('"');
}

/// For strings that cannot contain characters needing escapes, such as
/// rendered store paths and hashes.
fn print_unquoted_string(res: &mut String, s: &str) {
    res.push('"');
    res.push_str(s);
    res.push('"');
}

fn print_strings<'a, I>(res: &mut String, iter: I)
where
    I: IntoIterator<Item = &'a String>,
{
    res.push('[');
    let mut first = true;
    for item in iter {
        if first {
            first = false;
        } else {
            res.push(',');
        }
        print_string(res, item);
    }
    res.push(']');
}

fn print_unquoted_strings<'a, I>(res: &mut String, iter: I)
where
    I: IntoIterator<Item = &'a String>,
{
    res.push('[');
    let mut first = true;
    for item in iter {
        if first {
            first = false;
        } else {
            res.push(',');
        }
        print_unquoted_string(res, item);
    }
    res.push(']');
}

impl Derivation {
    /// Render the canonical textual form. With `mask_outputs` every
    /// output path field is emitted empty and env entries named after
    /// an output are blanked. `actual_inputs` substitutes the input
    /// derivation map wholesale; the modulo-hasher uses it to replace
    /// derivation paths with hashes.
    pub fn unparse(
        &self,
        store_dir: &StoreDir,
        mask_outputs: bool,
        actual_inputs: Option<&BTreeMap<String, StringSet>>,
    ) -> Result<String, ParseStorePathError> {
        let mut s = String::with_capacity(65536);
        s.push_str("Derive([");

        let mut first = true;
        for (output_name, output) in self.outputs.iter() {
            if first {
                first = false;
            } else {
                s.push(',');
            }
            s.push('(');
            print_string(&mut s, output_name);
            let (path_s, hash_algo, hash) = output_fields(
                store_dir,
                &self.name,
                output_name,
                output,
                mask_outputs,
            )?;
            s.push(',');
            print_unquoted_string(&mut s, &path_s);
            s.push(',');
            print_unquoted_string(&mut s, &hash_algo);
            s.push(',');
            print_unquoted_string(&mut s, &hash);
            s.push(')');
        }

        s.push_str("],[");
        first = true;
        if let Some(actual_inputs) = actual_inputs {
            for (input, outputs) in actual_inputs.iter() {
                if first {
                    first = false;
                } else {
                    s.push(',');
                }
                s.push('(');
                print_unquoted_string(&mut s, input);
                s.push(',');
                print_strings(&mut s, outputs);
                s.push(')');
            }
        } else {
            for (input_drv, outputs) in self.input_drvs.iter() {
                if first {
                    first = false;
                } else {
                    s.push(',');
                }
                s.push('(');
                print_unquoted_string(&mut s, &store_dir.print_path(input_drv));
                s.push(',');
                print_strings(&mut s, outputs);
                s.push(')');
            }
        }

        s.push_str("],");
        let paths: Vec<String> = self
            .input_srcs
            .iter()
            .map(|p| store_dir.print_path(p))
            .collect();
        print_unquoted_strings(&mut s, paths.iter());

        s.push(',');
        print_string(&mut s, &self.platform);
        s.push(',');
        print_string(&mut s, &self.builder);
        s.push(',');
        print_strings(&mut s, self.args.iter());

        s.push_str(",[");
        first = true;
        for (key, value) in self.env.iter() {
            if first {
                first = false;
            } else {
                s.push(',');
            }
            s.push('(');
            print_string(&mut s, key);
            s.push(',');
            print_string(
                &mut s,
                if mask_outputs && self.outputs.contains_key(key) {
                    ""
                } else {
                    value
                },
            );
            s.push(')');
        }

        s.push_str("])");
        Ok(s)
    }
}

/// The three serialized fields of one output.
fn output_fields(
    store_dir: &StoreDir,
    drv_name: &str,
    output_name: &str,
    output: &DerivationOutput,
    mask_outputs: bool,
) -> Result<(String, String, String), ParseStorePathError> {
    let mask = |path: String| if mask_outputs { String::new() } else { path };
    Ok(match output {
        DerivationOutput::InputAddressed(path) => (
            mask(store_dir.print_path(path)),
            String::new(),
            String::new(),
        ),
        DerivationOutput::CAFixed(dof) => {
            let path = store_dir.make_fixed_output_path(
                dof.method,
                &dof.hash,
                &output_path_name(drv_name, output_name),
                &StorePathSet::new(),
                false,
            )?;
            (
                mask(store_dir.print_path(&path)),
                dof.method_algo().to_string(),
                format!("{:#x}", dof.hash),
            )
        }
        DerivationOutput::CAFloating { method, hash_type } => (
            String::new(),
            format!("{:#}{}", method, hash_type),
            String::new(),
        ),
        DerivationOutput::Deferred => (String::new(), String::new(), String::new()),
    })
}

struct Parser<'a> {
    store_dir: &'a StoreDir,
    input: &'a str,
    pos: usize,
    /// The derivation name is not part of the serialization; it is
    /// needed to recompute fixed output paths.
    drv_name: &'a str,
}

impl<'a> Parser<'a> {
    fn unexpected(&self, expected: &str) -> ParseDerivationError {
        ParseDerivationError::UnexpectedToken {
            offset: self.pos,
            expected: expected.to_string(),
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), ParseDerivationError> {
        if self.input[self.pos..].starts_with(token) {
            self.pos += token.len();
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", token)))
        }
    }

    fn try_consume(&mut self, token: &str) -> bool {
        if self.input[self.pos..].starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    /// Consume a list separator; returns true when the list closed.
    fn list_sep(&mut self) -> Result<bool, ParseDerivationError> {
        if self.try_consume("]") {
            Ok(true)
        } else if self.try_consume(",") {
            Ok(false)
        } else {
            Err(self.unexpected("',' or ']'"))
        }
    }

    fn parse_list<F>(&mut self, mut entry: F) -> Result<(), ParseDerivationError>
    where
        F: FnMut(&mut Self) -> Result<(), ParseDerivationError>,
    {
        self.expect("[")?;
        if self.try_consume("]") {
            return Ok(());
        }
        loop {
            entry(self)?;
            if self.list_sep()? {
                return Ok(());
            }
        }
    }

    fn parse_string(&mut self) -> Result<String, ParseDerivationError> {
        self.expect("\"")?;
        let mut res = String::new();
        loop {
            match self.input[self.pos..].chars().next() {
                None => return Err(self.unexpected("'\"'")),
                Some('"') => {
                    self.pos += 1;
                    return Ok(res);
                }
                Some('\\') => {
                    let escape_pos = self.pos;
                    self.pos += 1;
                    match self.input[self.pos..].chars().next() {
                        None => return Err(ParseDerivationError::DanglingEscape(escape_pos)),
                        Some(c @ ('\\' | '"')) => {
                            res.push(c);
                            self.pos += 1;
                        }
                        Some('n') => {
                            res.push('\n');
                            self.pos += 1;
                        }
                        Some('r') => {
                            res.push('\r');
                            self.pos += 1;
                        }
                        Some('t') => {
                            res.push('\t');
                            self.pos += 1;
                        }
                        Some(c) => {
                            return Err(ParseDerivationError::UnknownEscape {
                                offset: escape_pos,
                                found: c,
                            })
                        }
                    }
                }
                // The encoder always escapes these, so a raw one is not
                // canonical input.
                Some('\n' | '\r' | '\t') => {
                    return Err(self.unexpected("escaped control character"))
                }
                Some(c) => {
                    res.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
    }

    fn parse_path_string(&mut self) -> Result<String, ParseDerivationError> {
        let s = self.parse_string()?;
        validate_path(&s)?;
        Ok(s)
    }

    /// Parse a list of strings that must be in strictly ascending order.
    fn parse_sorted_strings(
        &mut self,
        are_paths: bool,
    ) -> Result<Vec<String>, ParseDerivationError> {
        let mut res: Vec<String> = Vec::new();
        self.parse_list(|p| {
            let entry_offset = p.pos;
            let s = if are_paths {
                p.parse_path_string()?
            } else {
                p.parse_string()?
            };
            if let Some(last) = res.last() {
                if *last >= s {
                    return Err(ParseDerivationError::Misordered {
                        offset: entry_offset,
                        entry: s,
                    });
                }
            }
            res.push(s);
            Ok(())
        })?;
        Ok(res)
    }

    fn parse_outputs(&mut self) -> Result<DerivationOutputs, ParseDerivationError> {
        let mut outputs = DerivationOutputs::new();
        let drv_name = self.drv_name.to_string();
        self.parse_list(|p| {
            p.expect("(")?;
            let entry_offset = p.pos;
            let output_name = p.parse_string()?;
            p.expect(",")?;
            let path_s = p.parse_string()?;
            p.expect(",")?;
            let hash_algo = p.parse_string()?;
            p.expect(",")?;
            let hash = p.parse_string()?;
            p.expect(")")?;
            let output = DerivationOutput::parse_output(
                p.store_dir,
                path_s.clone(),
                hash_algo.clone(),
                hash.clone(),
            )?;
            let canonical =
                output_fields(p.store_dir, &drv_name, &output_name, &output, false)?;
            if (path_s, hash_algo, hash) != canonical {
                return Err(ParseDerivationError::NonCanonicalOutput {
                    offset: entry_offset,
                });
            }
            if let Some((last, _)) = outputs.last_key_value() {
                if *last == output_name {
                    return Err(ParseDerivationError::DuplicateOutput {
                        offset: entry_offset,
                        name: output_name,
                    });
                }
                if *last > output_name {
                    return Err(ParseDerivationError::Misordered {
                        offset: entry_offset,
                        entry: output_name,
                    });
                }
            }
            outputs.insert(output_name, output);
            Ok(())
        })?;
        Ok(outputs)
    }

    fn parse_input_drvs(&mut self) -> Result<DerivationInputs, ParseDerivationError> {
        let mut input_drvs = DerivationInputs::new();
        let mut last_path = None;
        self.parse_list(|p| {
            p.expect("(")?;
            let entry_offset = p.pos;
            let drv_path_s = p.parse_path_string()?;
            if let Some(last) = &last_path {
                if *last >= drv_path_s {
                    return Err(ParseDerivationError::Misordered {
                        offset: entry_offset,
                        entry: drv_path_s,
                    });
                }
            }
            p.expect(",")?;
            let outputs = p.parse_sorted_strings(false)?;
            p.expect(")")?;
            let drv_path = p.store_dir.parse_path(&drv_path_s)?;
            input_drvs.insert(drv_path, outputs.into_iter().collect());
            last_path = Some(drv_path_s);
            Ok(())
        })?;
        Ok(input_drvs)
    }
}

/// Parse the canonical textual form of a derivation. The name is not
/// part of the serialization; it comes from the file name of the
/// derivation.
pub fn parse_derivation(
    store_dir: &StoreDir,
    s: &str,
    name: String,
) -> Result<Derivation, ParseDerivationError> {
    let mut parser = Parser {
        store_dir,
        input: s,
        pos: 0,
        drv_name: &name,
    };

    parser.expect("Derive(")?;
    let outputs = parser.parse_outputs()?;
    parser.expect(",")?;
    let input_drvs = parser.parse_input_drvs()?;
    parser.expect(",")?;
    let input_srcs: StorePathSet = parser
        .parse_sorted_strings(true)?
        .iter()
        .map(|s| parser.store_dir.parse_path(s))
        .collect::<Result<_, _>>()?;
    parser.expect(",")?;
    let platform = parser.parse_string()?;
    parser.expect(",")?;
    let builder = parser.parse_string()?;
    parser.expect(",")?;
    let mut args = Vec::new();
    parser.parse_list(|p| {
        args.push(p.parse_string()?);
        Ok(())
    })?;
    parser.expect(",")?;
    let mut env = BTreeMap::new();
    let mut last_key: Option<String> = None;
    parser.parse_list(|p| {
        p.expect("(")?;
        let entry_offset = p.pos;
        let key = p.parse_string()?;
        if let Some(last) = &last_key {
            if *last >= key {
                return Err(ParseDerivationError::Misordered {
                    offset: entry_offset,
                    entry: key,
                });
            }
        }
        p.expect(",")?;
        let value = p.parse_string()?;
        p.expect(")")?;
        env.insert(key.clone(), value);
        last_key = Some(key);
        Ok(())
    })?;
    parser.expect(")")?;
    if parser.pos != parser.input.len() {
        return Err(parser.unexpected("end of input"));
    }

    Ok(Derivation {
        basic: super::BasicDerivation {
            outputs,
            input_srcs,
            platform,
            builder,
            args,
            env,
            name,
        },
        input_drvs,
    })
}
