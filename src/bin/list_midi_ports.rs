use ostinato::midi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("\nAvailable output ports:");
    for (index, port_name) in midi::list_output_ports()? {
        println!("    {}: {}", index, port_name);
    }
    println!();
    Ok(())
}
