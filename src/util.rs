use crate::error::{XrError, XrResult};

/// Two-call pattern helper: returns how many elements the full result has,
/// filling `out` when one is given. A buffer shorter than the result fails
/// without writing anything.
pub(crate) fn fill_buffer<T: Copy>(src: &[T], out: Option<&mut [T]>) -> XrResult<usize> {
    if let Some(out) = out {
        if out.len() < src.len() {
            return Err(XrError::SizeInsufficient);
        }
        out[..src.len()].copy_from_slice(src);
    }
    Ok(src.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_probe_then_fill() {
        let src = [1, 2, 3];
        assert_eq!(fill_buffer(&src, None), Ok(3));

        let mut small = [0; 2];
        assert_eq!(
            fill_buffer(&src, Some(&mut small)),
            Err(XrError::SizeInsufficient)
        );
        assert_eq!(small, [0; 2]);

        let mut exact = [0; 3];
        assert_eq!(fill_buffer(&src, Some(&mut exact)), Ok(3));
        assert_eq!(exact, src);
    }
}
