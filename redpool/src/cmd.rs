//! Command values and argument conversion.

use redpool_proto::encode_command;

/// Converts a value into one or more command arguments.
///
/// Strings and byte slices become a single argument, numbers their decimal
/// form, and tuples/lists contribute each element in order.
pub trait ToArgs {
    fn write_args(&self, out: &mut Vec<Vec<u8>>);
}

impl<T: ToArgs + ?Sized> ToArgs for &T {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        (**self).write_args(out)
    }
}

impl ToArgs for str {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.as_bytes().to_vec());
    }
}

impl ToArgs for String {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.as_bytes().to_vec());
    }
}

impl ToArgs for [u8] {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.to_vec());
    }
}

impl ToArgs for Vec<u8> {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.clone());
    }
}

impl<'a> ToArgs for [&'a str] {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        out.extend(self.iter().map(|item| item.as_bytes().to_vec()));
    }
}

impl<'a> ToArgs for Vec<&'a str> {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        self.as_slice().write_args(out)
    }
}

impl ToArgs for [String] {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        out.extend(self.iter().map(|item| item.as_bytes().to_vec()));
    }
}

impl ToArgs for Vec<String> {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        self.as_slice().write_args(out)
    }
}

/// No arguments, for commands such as `PING` or `DBSIZE`.
impl ToArgs for () {
    fn write_args(&self, _out: &mut Vec<Vec<u8>>) {}
}

macro_rules! numeric_args {
    ($($ty:ty),*) => {
        $(
            impl ToArgs for $ty {
                fn write_args(&self, out: &mut Vec<Vec<u8>>) {
                    out.push(self.to_string().into_bytes());
                }
            }
        )*
    };
}

numeric_args!(i16, i32, i64, isize, u16, u32, u64, usize, f32, f64);

macro_rules! tuple_args {
    ($($name:ident),+) => {
        impl<$($name: ToArgs),+> ToArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn write_args(&self, out: &mut Vec<Vec<u8>>) {
                let ($($name,)+) = self;
                $($name.write_args(out);)+
            }
        }
    };
}

tuple_args!(A);
tuple_args!(A, B);
tuple_args!(A, B, C);
tuple_args!(A, B, C, D);
tuple_args!(A, B, C, D, E);
tuple_args!(A, B, C, D, E, F);

/// One store command: a name and its ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    name: String,
    args: Vec<Vec<u8>>,
}

impl Cmd {
    /// Starts a command. The name is sent upper-cased.
    pub fn new(name: impl AsRef<str>) -> Self {
        Cmd {
            name: name.as_ref().to_ascii_uppercase(),
            args: Vec::new(),
        }
    }

    /// Appends one or more arguments.
    pub fn arg<A: ToArgs>(mut self, arg: A) -> Self {
        arg.write_args(&mut self.args);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    /// Appends the RESP encoding of this command to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.name.as_bytes());
        parts.extend(self.args.iter().map(Vec::as_slice));
        encode_command(&parts, out);
    }
}

/// Shorthand for [`Cmd::new`].
pub fn cmd(name: impl AsRef<str>) -> Cmd {
    Cmd::new(name)
}
