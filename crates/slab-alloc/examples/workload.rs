use std::{collections::VecDeque, fmt, process};

use argh::FromArgs;
use log::{Level, LevelFilter, Log, Metadata, Record, info, warn};
use slab_alloc::{AllocError, ArenaAllocator, BlockTable, MetaAllocator};
use snafu::{ResultExt as _, whatever};
use snafu_utils::{GenericError, Report};

/// Run a mixed allocate/free workload against both allocators.
#[derive(Debug, FromArgs)]
struct Args {
    /// arena region size in bytes
    #[argh(option, default = "4096")]
    region_size: usize,
    /// size of the offset space managed by the meta allocator
    #[argh(option, default = "65536")]
    meta_size: usize,
    /// alignment of meta allocations
    #[argh(option, default = "12")]
    alignment: usize,
    /// number of allocation rounds per allocator
    #[argh(option, default = "64")]
    rounds: usize,
    /// log every heap and chain mutation
    #[argh(switch, short = 'v')]
    verbose: bool,
}

struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            eprintln!(
                "{} [{}] {}",
                LevelFormat(record.level()),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

struct LevelFormat(Level);

impl fmt::Display for LevelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let color = match self.0 {
            Level::Trace => 35,
            Level::Debug => 34,
            Level::Info => 32,
            Level::Warn => 33,
            Level::Error => 31,
        };
        let msg = match self.0 {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => " INFO",
            Level::Warn => " WARN",
            Level::Error => "ERROR",
        };
        write!(f, "\x1b[{color}m{msg}\x1b[0m")
    }
}

fn main() {
    let args: Args = argh::from_env();

    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(if args.verbose {
            LevelFilter::Trace
        } else {
            LevelFilter::Info
        });
    }

    if let Err(err) = run(&args) {
        let report = Report::new(err);
        eprintln!("{report}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), GenericError> {
    run_arena(args).whatever_context("arena workload failed")?;
    run_meta(args).whatever_context("meta workload failed")?;
    Ok(())
}

fn run_arena(args: &Args) -> Result<(), GenericError> {
    let mut region = vec![0_u8; args.region_size];
    let mut arena = ArenaAllocator::new(&mut region).with_whatever_context(|_| {
        format!("failed to create arena, region_size={}", args.region_size)
    })?;

    let mut rng = XorShift::new(0x9e37_79b9_7f4a_7c15);
    let mut live = VecDeque::new();
    for round in 0..args.rounds {
        let size = rng.below(args.region_size / 8) + 1;
        match arena.allocate(size) {
            Ok(handle) => {
                if let Some(bytes) = arena.bytes_mut(&handle) {
                    bytes.fill(round.to_le_bytes()[0]);
                }
                live.push_back(handle);
            }
            Err(err) => {
                info!("round {round}: {err}");
                retire_oldest(&mut live, |handle| arena.free(handle))?;
            }
        }
        if rng.below(3) == 0 {
            retire_oldest(&mut live, |handle| arena.free(handle))?;
        }
        arena.check().whatever_context("arena integrity check failed")?;
    }

    println!("arena after {} rounds: {:?}", args.rounds, arena.stats());
    print_layout(arena.table());

    while let Some(handle) = live.pop_back() {
        arena.free(handle).whatever_context("failed to free arena block")?;
    }
    arena.check().whatever_context("arena integrity check failed")?;
    if arena.stats().blocks != 1 {
        whatever!("arena did not coalesce back to one block: {:?}", arena.stats());
    }
    Ok(())
}

fn run_meta(args: &Args) -> Result<(), GenericError> {
    let mut meta = MetaAllocator::new(args.meta_size).with_whatever_context(|_| {
        format!("failed to create meta allocator, meta_size={}", args.meta_size)
    })?;

    let mut rng = XorShift::new(0xd1b5_4a32_d192_ed03);
    let mut live = VecDeque::new();
    for round in 0..args.rounds {
        let size = rng.below(args.meta_size / 8) + 1;
        match meta.allocate_aligned(args.alignment, size) {
            Ok(offset) => {
                if offset % args.alignment != 0 {
                    whatever!("offset {offset} is not aligned to {}", args.alignment);
                }
                live.push_back(offset);
            }
            Err(err @ AllocError::InvalidAlignment { .. }) => {
                return Err(err).whatever_context("meta allocation rejected");
            }
            Err(err) => {
                info!("round {round}: {err}");
                retire_oldest(&mut live, |offset| meta.free(offset))?;
            }
        }
        if rng.below(3) == 0 {
            retire_oldest(&mut live, |offset| meta.free(offset))?;
        }
        meta.check().whatever_context("meta integrity check failed")?;
    }

    println!("meta after {} rounds: {:?}", args.rounds, meta.stats());
    print_layout(meta.table());

    while let Some(offset) = live.pop_front() {
        meta.free(offset).whatever_context("failed to free meta block")?;
    }
    meta.check().whatever_context("meta integrity check failed")?;
    Ok(())
}

fn retire_oldest<T, E, F>(live: &mut VecDeque<T>, free: F) -> Result<(), GenericError>
where
    E: core::error::Error + 'static,
    F: FnOnce(T) -> Result<(), E>,
{
    let Some(oldest) = live.pop_front() else {
        warn!("nothing left to free");
        return Ok(());
    };
    free(oldest).whatever_context("failed to free oldest block")
}

fn print_layout<const CAP: usize>(table: &BlockTable<CAP>) {
    for (id, block) in table {
        println!(
            "  {id} {:>8}..{:<8} {:>8} {}",
            block.offset(),
            block.end(),
            block.size(),
            block.state()
        );
    }
}

struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn below(&mut self, bound: usize) -> usize {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        usize::try_from(self.0 % u64::try_from(bound.max(1)).unwrap_or(u64::MAX)).unwrap_or(0)
    }
}
