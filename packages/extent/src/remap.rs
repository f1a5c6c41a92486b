//! Composing one run list against another.

use crate::{validate_runs, ExtentError, Run};

/// Translate `requested` (addresses within the space described by `base`)
/// into a run list over `base`'s backend.
///
/// Requested holes stay holes. A requested data run that lands on a hole in
/// `base`, or that runs past the end of `base`, is an error. Adjacent output
/// runs are merged when they are contiguous.
pub fn remap_runs(requested: &[Run], base: &[Run]) -> Result<Vec<Run>, ExtentError> {
    validate_runs(requested)?;
    let mut out: Vec<Run> = Vec::with_capacity(requested.len() + base.len());

    for (index, req) in requested.iter().enumerate() {
        if req.is_hole() {
            push_merged(&mut out, Run::hole(req.length))?;
            continue;
        }

        let mut addr = req.start;
        let mut left = req.length;
        for b in base {
            if left == 0 {
                break;
            }
            if addr >= b.length {
                addr -= b.length;
                continue;
            }
            if b.is_hole() {
                return Err(ExtentError::HoleReference { index });
            }
            let len = (b.length - addr).min(left);
            push_merged(&mut out, Run::new(b.start + addr, len))?;
            addr = 0;
            left -= len;
        }

        if left > 0 {
            return Err(ExtentError::BeyondEnd { index });
        }
    }

    Ok(out)
}

/// Fail if any requested data run reaches past the first period of a
/// repeating run list.
pub fn check_within_period(requested: &[Run], wrap_src: i64) -> Result<(), ExtentError> {
    validate_runs(requested)?;
    for (index, req) in requested.iter().enumerate() {
        if !req.is_hole() && req.end() > wrap_src {
            return Err(ExtentError::SpansWrap { index, wrap_src });
        }
    }
    Ok(())
}

fn push_merged(out: &mut Vec<Run>, run: Run) -> Result<(), ExtentError> {
    if run.length == 0 {
        return Ok(());
    }
    if let Some(tail) = out.last_mut() {
        let both_holes = tail.is_hole() && run.is_hole();
        let contiguous = !tail.is_hole() && !run.is_hole() && tail.end() == run.start;
        if both_holes || contiguous {
            tail.length = tail.length.checked_add(run.length).ok_or(ExtentError::Overflow)?;
            return Ok(());
        }
    }
    out.push(run);
    Ok(())
}
