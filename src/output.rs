use std::path::PathBuf;

use csv_core::WriteResult;

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser, Clone, Debug, Default)]
#[group(id = "output::Args")]
pub struct Args {
    /// Write to this file instead of the terminal.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
    #[arg(long, short='f', value_enum, default_value_t = Format::Table)]
    pub format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize a record to JSON")]
    SerializeJson(#[source] serde_json::Error),
    #[error("could not encode a CSV field")]
    EncodeCsv,
}

/// Something that can be printed as a line of a table and as a JSON record.
pub trait Row: serde::Serialize {
    const HEADERS: &'static [&'static str];
    fn cells(&self) -> Vec<String>;
}

impl Args {
    pub fn to_output<R: Row>(self) -> Result<Output<R>, Error> {
        Output::new(self, Box::new(std::io::stdout().lock()))
    }
}

pub struct Output<R> {
    args: Args,
    io: Box<dyn std::io::Write>,
    formatter: Formatter,
    row: std::marker::PhantomData<fn(&R)>,
}

enum Formatter {
    Csv,
    Table { comfy: comfy_table::Table, rows: usize },
    Jsonl,
}

fn new_table(headers: &[&'static str]) -> comfy_table::Table {
    let mut comfy = comfy_table::Table::new();
    comfy
        .set_header(headers.to_vec())
        .set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
    comfy
}

impl<R: Row> Output<R> {
    /// Start an output, writing to `terminal` unless the arguments name a file.
    pub fn new(args: Args, terminal: Box<dyn std::io::Write>) -> Result<Self, Error> {
        let io = match &args.output {
            None => terminal,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        let formatter = match args.format {
            Format::Table => Formatter::Table { comfy: new_table(R::HEADERS), rows: 0 },
            Format::Jsonl => Formatter::Jsonl,
            Format::Csv => Formatter::Csv,
        };
        let mut output = Output { args, io, formatter, row: std::marker::PhantomData };
        if let Formatter::Csv = output.formatter {
            output.write_csv_row(R::HEADERS)?;
        }
        Ok(output)
    }

    fn write_csv_row<V: std::ops::Deref<Target = str>>(
        &mut self,
        values: &[V],
    ) -> Result<(), Error> {
        let max_len = 2 + 2 * values.iter().map(|v| v.len()).max().unwrap_or(0);
        let mut output = vec![0; max_len];
        let mut writer = csv_core::Writer::new();
        for (idx, value) in values.iter().enumerate() {
            if idx > 0 {
                let (WriteResult::InputEmpty, ob) = writer.delimiter(&mut output) else {
                    return Err(Error::EncodeCsv);
                };
                self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))?;
            }
            let (WriteResult::InputEmpty, ib, ob) = writer.field(value.as_bytes(), &mut output)
            else {
                return Err(Error::EncodeCsv);
            };
            debug_assert_eq!(value.len(), ib);
            self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))?;
        }
        let (WriteResult::InputEmpty, ob) = writer.terminator(&mut output) else {
            return Err(Error::EncodeCsv);
        };
        self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))
    }

    pub fn row(&mut self, row: &R) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv => {
                let cells = row.cells();
                self.write_csv_row(&cells)?;
            }
            Formatter::Table { comfy, rows } => {
                comfy.add_row(row.cells());
                *rows += 1;
            }
            Formatter::Jsonl => {
                serde_json::to_writer(&mut self.io, row).map_err(Error::SerializeJson)?;
                writeln!(self.io).map_err(|e| self.write_error(e))?
            }
        }
        Ok(())
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.args.output {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.into()),
        }
    }

    /// Write out everything gathered so far. A table is printed and started afresh.
    pub fn flush(&mut self) -> Result<(), Error> {
        if let Formatter::Table { comfy, rows } = &mut self.formatter {
            let table = std::mem::replace(comfy, new_table(R::HEADERS));
            if std::mem::take(rows) > 0 {
                writeln!(self.io, "{table}").map_err(|e| self.write_error(e))?;
            }
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }

    pub fn commit(mut self) -> Result<(), Error> {
        self.flush()
    }
}
