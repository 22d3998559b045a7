//! Lists the Open vSwitch datapaths and their ports, then prints upcalls and port changes.
//! Needs the `openvswitch` kernel module and `CAP_NET_ADMIN`.

use futures::StreamExt;

use vnet::{datapath::DatapathEvent, NetlinkConnection, NetlinkSocket, OvsDatapathConnection};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let (conn, notifications) = NetlinkConnection::spawn(NetlinkSocket::open()?);
    let dp = OvsDatapathConnection::initialize(conn).await?;

    for datapath in dp.enumerate_datapaths().await? {
        println!("{} (index {})", datapath.name, datapath.index);
        for port in dp.enumerate_ports(&datapath).await? {
            println!("  {:>3} {} [{}]", port.number, port.name, port.port_type);
        }
    }

    dp.subscribe_port_events().await?;

    let mut events = dp.events(notifications);
    while let Some(event) = events.next().await {
        match event {
            Ok(DatapathEvent::Upcall(upcall)) => {
                println!("{:?} on port {:?}: {:?}", upcall.kind, upcall.flow_match.in_port(), upcall.frame());
            }
            Ok(DatapathEvent::PortCreated(port)) => println!("+ {} ({})", port.name, port.number),
            Ok(DatapathEvent::PortDeleted(port)) => println!("- {} ({})", port.name, port.number),
            Ok(DatapathEvent::Other(msg)) => println!("? type {}", msg.ty()),
            Err(e) => eprintln!("undecodable event: {e}"),
        }
    }

    Ok(())
}
