//! Byte-level framing shared with the daemon wire protocol: unsigned
//! 64-bit little-endian integers, length-prefixed strings padded to an
//! 8-byte boundary, and counted collections.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub(crate) const ZEROS: [u8; 8] = [0u8; 8];

pub const fn calc_padding(size: u64) -> usize {
    (size.wrapping_neg() & 7) as usize
}

/// Parse a string into a `T` with some state in hand, typically a
/// [`StoreDir`] turning full path strings into store paths.
///
/// [`StoreDir`]: crate::StoreDir
pub trait StateParse<T> {
    type Err;
    fn parse(&self, s: &str) -> Result<T, Self::Err>;
}

/// Inverse of [`StateParse`].
pub trait StatePrint<T> {
    fn print(&self, item: &T) -> String;
}

async fn get_u64<R>(source: &mut R) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8];
    source.read_exact(&mut buf).await?;
    Ok(u64::from_le_bytes(buf))
}

async fn put_u64<W>(sink: &mut W, value: u64) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    sink.write_all(&value.to_le_bytes()).await
}

#[async_trait]
pub trait AsyncSource {
    async fn read_usize(&mut self) -> io::Result<usize>;
    async fn read_string(&mut self) -> io::Result<String>;
    async fn read_string_coll(&mut self) -> io::Result<Vec<String>>;
    async fn read_parsed<S, T>(&mut self, state: &S) -> Result<T, S::Err>
    where
        S: StateParse<T> + Sync,
        S::Err: From<io::Error> + Send + 'static,
        T: Send;
    async fn read_parsed_coll<S, T, C>(&mut self, state: &S) -> Result<C, S::Err>
    where
        S: StateParse<T> + Sync,
        S::Err: From<io::Error> + Send + 'static,
        T: Send,
        C: Default + Extend<T> + Send;
}

#[async_trait]
impl<R> AsyncSource for R
where
    R: AsyncRead + Unpin + Send,
{
    async fn read_usize(&mut self) -> io::Result<usize> {
        Ok(get_u64(self).await? as usize)
    }

    async fn read_string(&mut self) -> io::Result<String> {
        let len = get_u64(self).await?;
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf).await?;
        let padding = calc_padding(len);
        if padding > 0 {
            let mut pad = [0u8; 8];
            self.read_exact(&mut pad[..padding]).await?;
            if pad[..padding] != ZEROS[..padding] {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "string padding is not zero",
                ));
            }
        }
        String::from_utf8(buf)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "string is not valid UTF-8"))
    }

    async fn read_string_coll(&mut self) -> io::Result<Vec<String>> {
        let len = self.read_usize().await?;
        let mut ret = Vec::with_capacity(len);
        for _n in 0..len {
            ret.push(self.read_string().await?);
        }
        Ok(ret)
    }

    async fn read_parsed<S, T>(&mut self, state: &S) -> Result<T, S::Err>
    where
        S: StateParse<T> + Sync,
        S::Err: From<io::Error> + Send + 'static,
        T: Send,
    {
        let s = self.read_string().await?;
        state.parse(&s)
    }

    async fn read_parsed_coll<S, T, C>(&mut self, state: &S) -> Result<C, S::Err>
    where
        S: StateParse<T> + Sync,
        S::Err: From<io::Error> + Send + 'static,
        T: Send,
        C: Default + Extend<T> + Send,
    {
        let len = self.read_usize().await?;
        let mut ret = C::default();
        for _n in 0..len {
            let s = self.read_string().await?;
            ret.extend(std::iter::once(state.parse(&s)?));
        }
        Ok(ret)
    }
}

#[async_trait]
pub trait AsyncSink {
    async fn write_usize(&mut self, value: usize) -> io::Result<()>;
    async fn write_str(&mut self, s: &str) -> io::Result<()>;
    async fn write_string_coll(&mut self, coll: &[String]) -> io::Result<()>;
    async fn write_printed<S, T>(&mut self, state: &S, item: &T) -> io::Result<()>
    where
        S: StatePrint<T> + Sync,
        T: Sync;
    async fn write_printed_coll<S, T>(
        &mut self,
        state: &S,
        coll: &std::collections::BTreeSet<T>,
    ) -> io::Result<()>
    where
        S: StatePrint<T> + Sync,
        T: Ord + Sync;
}

#[async_trait]
impl<W> AsyncSink for W
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_usize(&mut self, value: usize) -> io::Result<()> {
        put_u64(self, value as u64).await
    }

    async fn write_str(&mut self, s: &str) -> io::Result<()> {
        let buf = s.as_bytes();
        put_u64(self, buf.len() as u64).await?;
        self.write_all(buf).await?;
        let padding = calc_padding(buf.len() as u64);
        if padding > 0 {
            self.write_all(&ZEROS[..padding]).await?;
        }
        Ok(())
    }

    async fn write_string_coll(&mut self, coll: &[String]) -> io::Result<()> {
        self.write_usize(coll.len()).await?;
        for item in coll {
            self.write_str(item).await?;
        }
        Ok(())
    }

    async fn write_printed<S, T>(&mut self, state: &S, item: &T) -> io::Result<()>
    where
        S: StatePrint<T> + Sync,
        T: Sync,
    {
        let s = state.print(item);
        self.write_str(&s).await
    }

    async fn write_printed_coll<S, T>(
        &mut self,
        state: &S,
        coll: &std::collections::BTreeSet<T>,
    ) -> io::Result<()>
    where
        S: StatePrint<T> + Sync,
        T: Ord + Sync,
    {
        self.write_usize(coll.len()).await?;
        for item in coll {
            let s = state.print(item);
            self.write_str(&s).await?;
        }
        Ok(())
    }
}
