use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use structopt::StructOpt;

use canteen::orders::{Order, OrderCode, Pin};
use infra::ids::{Id, IdGen};

#[derive(Debug, StructOpt)]
#[structopt(name = "idgen", about = "Generate Identifiers")]
enum Commands {
    #[structopt(name = "gen", about = "Generate order ids")]
    Generate(Generate),
    #[structopt(name = "code", about = "Generate order display codes")]
    Code(Generate),
    #[structopt(name = "pin", about = "Generate collection PINs")]
    Pin(Generate),
    #[structopt(name = "decompose", about = "Decompose Identifiers")]
    Decompose(Decompose),
}

#[derive(Debug, StructOpt)]
struct Generate {
    #[structopt(short = "n", long = "count", default_value = "1")]
    count: usize,
}

#[derive(Debug, StructOpt)]
struct Decompose {
    ids: Vec<Id<Order>>,
}

fn main() -> Result<()> {
    let cmd = Commands::from_args();
    let mut rng = rand::thread_rng();

    match cmd {
        Commands::Generate(opt) => {
            let idgen = IdGen::new();
            for _ in 0..opt.count {
                println!("{}", idgen.generate::<Order>());
            }
        }
        Commands::Code(opt) => {
            for _ in 0..opt.count {
                println!("{}", OrderCode::generate(Utc::now(), &mut rng));
            }
        }
        Commands::Pin(opt) => {
            for _ in 0..opt.count {
                println!("{}", Pin::generate(&mut rng));
            }
        }
        Commands::Decompose(opt) => {
            for id in opt.ids {
                match id.timestamp() {
                    Some(stamp) => println!(
                        "{:?} t:{}; fallback code:{}",
                        id,
                        stamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                        OrderCode::fallback(id)
                    ),
                    None => println!("{:?} t:out of range", id),
                }
            }
        }
    }

    Ok(())
}
